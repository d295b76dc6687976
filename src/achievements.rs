//! Achievement catalog and rule engine.
//!
//! Catalog rows arrive loosely typed (TOML config or the built-in seed table) and are
//! validated once into `AchievementDefinition`s carrying a typed `Condition`. The engine
//! itself is a pure function over a finished game, the player's aggregates and the set of
//! names the player already holds.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::domain::{Difficulty, GameResult, UserHistory};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
  Gte,
  Lte,
  Eq,
}

impl Comparison {
  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "gte" => Some(Comparison::Gte),
      "lte" => Some(Comparison::Lte),
      "eq" => Some(Comparison::Eq),
      _ => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Comparison::Gte => "gte",
      Comparison::Lte => "lte",
      Comparison::Eq => "eq",
    }
  }

  pub fn test(self, lhs: f64, rhs: f64) -> bool {
    match self {
      Comparison::Gte => lhs >= rhs,
      Comparison::Lte => lhs <= rhs,
      Comparison::Eq => lhs == rhs,
    }
  }
}

/// Raw condition payload, as written in config and stored as JSON text.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ConditionRow {
  #[serde(rename = "type")]
  pub kind: String,
  pub operator: String,
  pub value: f64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub difficulty: Option<Difficulty>,
}

/// Raw catalog row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AchievementRow {
  pub name: String,
  pub description: String,
  pub icon: String,
  pub category: String,
  pub points: u32,
  pub condition: ConditionRow,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
  Score { op: Comparison, value: f64 },
  Games { op: Comparison, value: f64 },
  Streak { op: Comparison, value: f64 },
  Speed { op: Comparison, value: f64 },
  /// Always tested as equality; `declared_op` is kept only so the row round-trips.
  Hints { declared_op: Comparison, value: f64, difficulty: Option<Difficulty> },
  /// A condition type with no evaluation rule. Never satisfied.
  Unsupported { kind: String },
}

impl Condition {
  pub fn is_satisfied(&self, result: &GameResult, history: &UserHistory) -> bool {
    match self {
      Condition::Score { op, value } => op.test(f64::from(result.score), *value),
      Condition::Games { op, value } => op.test(f64::from(history.total_games), *value),
      Condition::Streak { op, value } => op.test(f64::from(result.streak), *value),
      Condition::Speed { op, value } => op.test(f64::from(result.time_spent_secs), *value),
      Condition::Hints { value, difficulty, .. } => {
        f64::from(result.hints_used) == *value
          && difficulty.map_or(true, |d| d == result.difficulty)
      }
      Condition::Unsupported { .. } => false,
    }
  }

  pub fn to_row(&self) -> ConditionRow {
    let (kind, op, value, difficulty) = match self {
      Condition::Score { op, value } => ("score", op.as_str(), *value, None),
      Condition::Games { op, value } => ("games", op.as_str(), *value, None),
      Condition::Streak { op, value } => ("streak", op.as_str(), *value, None),
      Condition::Speed { op, value } => ("speed", op.as_str(), *value, None),
      Condition::Hints { declared_op, value, difficulty } => ("hints", declared_op.as_str(), *value, *difficulty),
      Condition::Unsupported { kind } => {
        return ConditionRow { kind: kind.clone(), operator: "eq".into(), value: 0.0, difficulty: None };
      }
    };
    ConditionRow { kind: kind.into(), operator: op.into(), value, difficulty }
  }
}

#[derive(Debug, Error, PartialEq)]
pub enum CatalogError {
  #[error("achievement '{name}': unknown operator '{operator}'")]
  UnknownOperator { name: String, operator: String },
  #[error("achievement '{name}': condition value must be a finite number")]
  InvalidValue { name: String },
  #[error("achievement '{0}' is defined more than once")]
  DuplicateName(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct AchievementDefinition {
  pub name: String,
  pub description: String,
  pub icon: String,
  pub category: String,
  pub points: u32,
  pub condition: Condition,
}

impl AchievementDefinition {
  pub fn from_row(row: AchievementRow) -> Result<Self, CatalogError> {
    let c = &row.condition;
    let op = Comparison::parse(&c.operator).ok_or_else(|| CatalogError::UnknownOperator {
      name: row.name.clone(),
      operator: c.operator.clone(),
    })?;
    if !c.value.is_finite() {
      return Err(CatalogError::InvalidValue { name: row.name.clone() });
    }
    let value = c.value;
    let condition = match c.kind.as_str() {
      "score" => Condition::Score { op, value },
      "games" => Condition::Games { op, value },
      "streak" => Condition::Streak { op, value },
      "speed" => Condition::Speed { op, value },
      "hints" => Condition::Hints { declared_op: op, value, difficulty: c.difficulty },
      other => {
        warn!(target: "achievements", name = %row.name, kind = %other, "Condition type has no rule; it will never unlock");
        Condition::Unsupported { kind: other.to_string() }
      }
    };
    Ok(Self {
      name: row.name,
      description: row.description,
      icon: row.icon,
      category: row.category,
      points: row.points,
      condition,
    })
  }

  pub fn to_row(&self) -> AchievementRow {
    AchievementRow {
      name: self.name.clone(),
      description: self.description.clone(),
      icon: self.icon.clone(),
      category: self.category.clone(),
      points: self.points,
      condition: self.condition.to_row(),
    }
  }
}

/// Validate rows, dropping (and logging) the ones that cannot be typed.
pub fn build_catalog(rows: Vec<AchievementRow>) -> Vec<AchievementDefinition> {
  rows
    .into_iter()
    .filter_map(|row| match AchievementDefinition::from_row(row) {
      Ok(def) => Some(def),
      Err(e) => {
        warn!(target: "achievements", error = %e, "Skipping achievement row");
        None
      }
    })
    .collect()
}

/// Immutable, shareable catalog plus the evaluation rule.
#[derive(Clone, Debug)]
pub struct AchievementEngine {
  catalog: Arc<[AchievementDefinition]>,
}

impl AchievementEngine {
  pub fn new(catalog: Vec<AchievementDefinition>) -> Result<Self, CatalogError> {
    let mut seen = HashSet::new();
    for def in &catalog {
      if !seen.insert(def.name.as_str()) {
        return Err(CatalogError::DuplicateName(def.name.clone()));
      }
    }
    Ok(Self { catalog: catalog.into() })
  }

  pub fn catalog(&self) -> &[AchievementDefinition] {
    &self.catalog
  }

  /// Newly satisfied definitions, in catalog order. Names in `already_unlocked` are
  /// skipped unconditionally.
  #[instrument(level = "debug", skip(self, result, history, already_unlocked), fields(%user_id, held = already_unlocked.len()))]
  pub fn evaluate(
    &self,
    user_id: &str,
    result: &GameResult,
    history: &UserHistory,
    already_unlocked: &HashSet<String>,
  ) -> Vec<&AchievementDefinition> {
    let unlocked: Vec<&AchievementDefinition> = self
      .catalog
      .iter()
      .filter(|def| !already_unlocked.contains(&def.name))
      .filter(|def| def.condition.is_satisfied(result, history))
      .collect();
    debug!(target: "achievements", %user_id, count = unlocked.len(), "Achievements evaluated");
    unlocked
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::seeds::default_achievement_rows;

  fn engine() -> AchievementEngine {
    AchievementEngine::new(build_catalog(default_achievement_rows())).expect("catalog")
  }

  fn result(score: u32, hints_used: u32, difficulty: Difficulty, time_spent_secs: u32, streak: u32) -> GameResult {
    GameResult { score, challenges_completed: 3, hints_used, time_spent_secs, difficulty, streak }
  }

  fn history(total_games: u32) -> UserHistory {
    UserHistory { total_games, ..Default::default() }
  }

  fn names(defs: &[&AchievementDefinition]) -> Vec<String> {
    defs.iter().map(|d| d.name.clone()).collect()
  }

  #[test]
  fn perfect_game_unlocks_whole_catalog() {
    let e = engine();
    let got = e.evaluate("u1", &result(300, 0, Difficulty::Hard, 45, 5), &history(10), &HashSet::new());
    assert_eq!(
      names(&got),
      vec!["First Steps", "Speed Demon", "Perfect Score", "No Hints Needed", "Streak Master", "Challenge Champion"]
    );
  }

  #[test]
  fn evaluation_is_repeatable() {
    let e = engine();
    let r = result(120, 2, Difficulty::Medium, 50, 2);
    let h = history(1);
    let held = HashSet::from(["Speed Demon".to_string()]);
    let first = names(&e.evaluate("u1", &r, &h, &held));
    let second = names(&e.evaluate("u1", &r, &h, &held));
    assert_eq!(first, second);
    assert_eq!(first, vec!["First Steps"]);
  }

  #[test]
  fn held_achievements_are_never_granted_again() {
    let e = engine();
    let held = HashSet::from(["Perfect Score".to_string()]);
    let got = e.evaluate("u1", &result(500, 1, Difficulty::Easy, 170, 1), &history(1), &held);
    assert!(!names(&got).contains(&"Perfect Score".to_string()));
  }

  #[test]
  fn no_hints_needed_requires_hard() {
    let e = engine();
    let got = e.evaluate("u1", &result(0, 0, Difficulty::Easy, 170, 0), &history(2), &HashSet::new());
    assert_eq!(names(&got), vec!["First Steps"]);
  }

  #[test]
  fn hints_condition_ignores_declared_operator() {
    let row = AchievementRow {
      name: "Frugal".into(),
      description: "".into(),
      icon: "".into(),
      category: "Skill".into(),
      points: 1,
      condition: ConditionRow { kind: "hints".into(), operator: "gte".into(), value: 1.0, difficulty: None },
    };
    let e = AchievementEngine::new(vec![AchievementDefinition::from_row(row).unwrap()]).unwrap();
    let h = history(1);
    assert!(e.evaluate("u", &result(0, 3, Difficulty::Easy, 10, 0), &h, &HashSet::new()).is_empty());
    assert_eq!(e.evaluate("u", &result(0, 1, Difficulty::Easy, 10, 0), &h, &HashSet::new()).len(), 1);
  }

  #[test]
  fn unknown_condition_type_never_unlocks() {
    let row = AchievementRow {
      name: "Mystery".into(),
      description: "".into(),
      icon: "".into(),
      category: "Hidden".into(),
      points: 5,
      condition: ConditionRow { kind: "difficulty".into(), operator: "eq".into(), value: 0.0, difficulty: Some(Difficulty::Hard) },
    };
    let def = AchievementDefinition::from_row(row).unwrap();
    assert!(matches!(def.condition, Condition::Unsupported { .. }));
    let e = AchievementEngine::new(vec![def]).unwrap();
    assert!(e.evaluate("u", &result(999, 0, Difficulty::Hard, 1, 9), &history(99), &HashSet::new()).is_empty());
  }

  #[test]
  fn bad_rows_are_dropped_and_duplicates_rejected() {
    let mut rows = default_achievement_rows();
    rows[0].condition.operator = "between".into();
    assert_eq!(build_catalog(rows).len(), 5);

    let mut dup = build_catalog(default_achievement_rows());
    dup.push(dup[0].clone());
    assert_eq!(
      AchievementEngine::new(dup).unwrap_err(),
      CatalogError::DuplicateName("First Steps".into())
    );
  }

  #[test]
  fn condition_rows_round_trip_through_definitions() {
    for row in default_achievement_rows() {
      let def = AchievementDefinition::from_row(row.clone()).unwrap();
      assert_eq!(def.to_row().condition, row.condition);
    }
  }
}
