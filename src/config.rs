//! Loading service configuration (prompts, game rules, challenge bank, achievement
//! catalog) from TOML.
//!
//! See `AppConfig` and `Prompts` for expected schema.

use serde::Deserialize;
use tracing::{error, info};

use crate::achievements::AchievementRow;
use crate::domain::{Difficulty, Hint};

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub game: GameRules,
  #[serde(default)]
  pub challenges: Vec<ChallengeCfg>,
  /// When non-empty, replaces the built-in achievement catalog.
  #[serde(default)]
  pub achievements: Vec<AchievementRow>,
}

/// Timer, lives and scoring constants for a session.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GameRules {
  pub round_secs: u32,
  pub initial_lives: u32,
  pub max_level: u32,
  pub points_per_streak: u32,
}

impl Default for GameRules {
  fn default() -> Self {
    Self { round_secs: 180, initial_lives: 3, max_level: 3, points_per_streak: 100 }
  }
}

/// Challenge entry accepted in TOML configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct ChallengeCfg {
  #[serde(default)] pub id: Option<String>,
  pub difficulty: Difficulty,
  pub title: String,
  pub code: String,
  pub solution: String,
  #[serde(default)] pub explanation: String,
  #[serde(default)] pub category: String,
  #[serde(default)] pub hints: Vec<Hint>,
}

/// Prompts used by the OpenAI client. `{level}` and `{difficulty}` are substituted.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub challenge_system: String,
  pub challenge_user_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      challenge_system: "You are a coding challenge generator. Generate challenges that test debugging skills. \
        Respond ONLY with a JSON object of the form \
        {\"title\": string, \"code\": buggy code (no newlines at start/end), \"solution\": correct code (no newlines at start/end), \
        \"explanation\": string, \"category\": \"Algorithm/DataStructure/etc\", \
        \"hints\": [{\"text\": string, \"pointsDeduction\": number}]}".into(),
      challenge_user_template: "Generate a level {level} coding challenge. Make it {difficulty}.".into(),
    }
  }
}

/// Parse a TOML document into `AppConfig`.
pub fn parse_config(s: &str) -> Result<AppConfig, toml::de::Error> {
  toml::from_str::<AppConfig>(s)
}

/// Attempt to load `AppConfig` from CODEQUEST_CONFIG. On any parsing/IO error, returns None.
pub fn load_config_from_env() -> Option<AppConfig> {
  let path = std::env::var("CODEQUEST_CONFIG").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match parse_config(&s) {
      Ok(cfg) => {
        info!(target: "codequest_backend", %path, challenges = cfg.challenges.len(), achievements = cfg.achievements.len(), "Loaded config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "codequest_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "codequest_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_document_yields_defaults() {
    let cfg = parse_config("").unwrap();
    assert_eq!(cfg.game, GameRules::default());
    assert!(cfg.challenges.is_empty());
    assert!(cfg.achievements.is_empty());
    assert!(cfg.prompts.challenge_user_template.contains("{level}"));
  }

  #[test]
  fn full_document_parses() {
    let cfg = parse_config(
      r#"
      [game]
      round_secs = 90
      max_level = 5

      [[challenges]]
      difficulty = "Medium"
      title = "Swap"
      code = "a = b; b = a;"
      solution = "[a, b] = [b, a];"
      hints = [{ text = "temp", pointsDeduction = 10 }]

      [[achievements]]
      name = "Marathon"
      description = "Play 100 games"
      icon = "🏃"
      category = "Progress"
      points = 100
      condition = { type = "games", operator = "gte", value = 100 }
      "#,
    )
    .unwrap();
    assert_eq!(cfg.game.round_secs, 90);
    assert_eq!(cfg.game.initial_lives, 3);
    assert_eq!(cfg.game.max_level, 5);
    assert_eq!(cfg.challenges[0].difficulty, Difficulty::Medium);
    assert_eq!(cfg.challenges[0].hints[0].points_deduction, 10);
    assert_eq!(cfg.achievements[0].condition.kind, "games");
    assert_eq!(cfg.achievements[0].condition.value, 100.0);
  }
}
