//! Error taxonomy for game actions. None of these are fatal to the process.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GameError {
  #[error("hint index {0} is out of range")]
  InvalidIndex(usize),
  #[error("hint {0} was already used for this challenge")]
  AlreadyUsed(usize),
  #[error("no game in progress")]
  NotPlaying,
  #[error("challenge generation failed: {0}")]
  GenerationFailure(String),
  #[error("failed to persist game: {0}")]
  PersistenceFailure(String),
}

impl GameError {
  /// Short machine-readable code sent to clients next to the message.
  pub fn code(&self) -> &'static str {
    match self {
      GameError::InvalidIndex(_) => "invalid_index",
      GameError::AlreadyUsed(_) => "already_used",
      GameError::NotPlaying => "not_playing",
      GameError::GenerationFailure(_) => "generation_failure",
      GameError::PersistenceFailure(_) => "persistence_failure",
    }
  }
}

impl From<anyhow::Error> for GameError {
  fn from(e: anyhow::Error) -> Self {
    GameError::PersistenceFailure(format!("{e:#}"))
  }
}
