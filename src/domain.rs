//! Domain models used by the backend: difficulty, challenges and hints, per-session stats,
//! finished-game results and the per-user aggregates kept by the store.

use serde::{Deserialize, Serialize};

/// Challenge difficulty. Also the difficulty a finished game is filed under.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Difficulty {
  Easy,
  Medium,
  Hard,
}

impl Difficulty {
  /// Level 1 is Easy, level 2 Medium, anything above is Hard.
  pub fn for_level(level: u32) -> Self {
    match level {
      0 | 1 => Difficulty::Easy,
      2 => Difficulty::Medium,
      _ => Difficulty::Hard,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Difficulty::Easy => "Easy",
      Difficulty::Medium => "Medium",
      Difficulty::Hard => "Hard",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s.trim().to_ascii_lowercase().as_str() {
      "easy" => Some(Difficulty::Easy),
      "medium" => Some(Difficulty::Medium),
      "hard" => Some(Difficulty::Hard),
      _ => None,
    }
  }
}

/// Where did we get the challenge from?
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeSource {
  LocalBank,   // from user-provided TOML bank
  Generated,   // generated via OpenAI
  Seed,        // built-in seeds
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
  pub text: String,
  #[serde(default)]
  pub points_deduction: u32,
}

/// One buggy-code puzzle. Immutable once issued to a session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Challenge {
  pub id: String,
  pub title: String,
  pub buggy_code: String,
  pub solution_code: String,
  pub explanation: String,
  pub category: String,
  pub difficulty: Difficulty,
  #[serde(default)]
  pub hints: Vec<Hint>,
  pub source: ChallengeSource,
}

impl Challenge {
  /// Byte-equality after trimming surrounding whitespace on both sides.
  pub fn is_solved_by(&self, code: &str) -> bool {
    code.trim() == self.solution_code.trim()
  }
}

/// Mutable per-session counters.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GameStats {
  pub score: u32,
  pub streak: u32,
  pub level: u32,
  pub time_remaining_secs: u32,
  pub lives: u32,
}

/// Frozen summary of one finished session.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GameResult {
  pub score: u32,
  pub challenges_completed: u32,
  pub hints_used: u32,
  pub time_spent_secs: u32,
  pub difficulty: Difficulty,
  pub streak: u32,
}

/// Per-user aggregates, recomputed by the store after every saved game.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserHistory {
  pub total_games: u32,
  pub high_score: u32,
  pub total_hints: u32,
  pub average_time_secs: f64,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn level_maps_to_difficulty() {
    assert_eq!(Difficulty::for_level(1), Difficulty::Easy);
    assert_eq!(Difficulty::for_level(2), Difficulty::Medium);
    assert_eq!(Difficulty::for_level(3), Difficulty::Hard);
    assert_eq!(Difficulty::for_level(9), Difficulty::Hard);
  }

  #[test]
  fn solution_match_ignores_outer_whitespace_only() {
    let ch = crate::seeds::seed_challenges().remove(0);
    let padded = format!("\n  {}  \n", ch.solution_code);
    assert!(ch.is_solved_by(&padded));
    assert!(!ch.is_solved_by(&ch.buggy_code));
  }
}
