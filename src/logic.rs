//! Core behaviors shared by both HTTP and WebSocket handlers.
//!
//! This includes:
//!   - Driving a player's session (start, hint, submit, snapshot)
//!   - Arming the countdown timer for a started session
//!   - Finishing a game: persist the result, evaluate and record achievements

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, instrument, warn};

use crate::domain::{GameResult, UserHistory};
use crate::error::GameError;
use crate::game::{GameSession, SubmitOutcome};
use crate::protocol::{achievement_out, snapshot_of, AchievementOut, GameOut, GameOverOut, HintOut, SubmitOut};
use crate::state::{AppState, SharedSession};

/// Persist `result`, then grant every achievement it newly satisfies.
#[instrument(level = "info", skip(state, result), fields(%user_id, score = result.score))]
pub fn finish_game(state: &AppState, user_id: &str, result: &GameResult) -> Result<(UserHistory, Vec<AchievementOut>), GameError> {
  let now = Utc::now();
  let history = state.store.save_game(user_id, result, now)?;
  let held = state.store.unlocked_names(user_id)?;
  let candidates = state.engine.evaluate(user_id, result, &history, &held);
  let inserted: HashSet<String> = state.store.record_unlocks(user_id, &candidates, now)?.into_iter().collect();

  let unlocked: Vec<AchievementOut> = candidates
    .into_iter()
    .filter(|d| inserted.contains(&d.name))
    .map(achievement_out)
    .collect();
  info!(target: "achievements", %user_id, total_games = history.total_games, unlocked = unlocked.len(), "Game recorded");
  Ok((history, unlocked))
}

/// Runs `finish_game` on the blocking pool.
async fn record_game(state: &Arc<AppState>, user_id: &str, result: &GameResult) -> Result<(UserHistory, Vec<AchievementOut>), GameError> {
  let state = state.clone();
  let user_id = user_id.to_string();
  let result = result.clone();
  tokio::task::spawn_blocking(move || finish_game(&state, &user_id, &result))
    .await
    .map_err(|e| GameError::PersistenceFailure(format!("recording task failed: {e}")))?
}

/// Drain the session outbox and, when a game just ended, record it. The reveal comes
/// from the challenge that ended, never from a challenge a restart made live.
async fn settle(state: &Arc<AppState>, user_id: &str, session: &mut GameSession) -> Result<Option<GameOverOut>, GameError> {
  let Some(result) = session.take_result() else {
    return Ok(None);
  };
  let (solution, explanation) = match session.ended_challenge() {
    Some(c) => (Some(c.solution_code.clone()), Some(c.explanation.clone())),
    None => (None, None),
  };
  let (history, unlocked) = record_game(state, user_id, &result).await?;
  Ok(Some(GameOverOut { result, history, unlocked, solution, explanation }))
}

/// Settle the session after an action, even a rejected one: lazy expiry can end the
/// session right before the action is refused.
async fn settled<T>(
  state: &Arc<AppState>,
  user_id: &str,
  session: &mut GameSession,
  outcome: Result<T, GameError>,
) -> Result<(T, Option<GameOverOut>), GameError> {
  let game_over = settle(state, user_id, session).await;
  let value = outcome?;
  Ok((value, game_over?))
}

/// Start a fresh level 1 session. A game in progress is ended and recorded first.
///
/// A live session always has a countdown: the timer is armed before a failure to record
/// the previous game is returned.
#[instrument(level = "info", skip(state), fields(%user_id))]
pub async fn start_game(state: &Arc<AppState>, user_id: &str) -> Result<GameOut, GameError> {
  let shared = state.session(user_id).await;
  let mut session = shared.lock().await;
  session.start(state.challenges.as_ref()).await?;
  let game_over = settle(state, user_id, &mut session).await;

  if let Some(after) = session.remaining() {
    spawn_timer(state.clone(), user_id.to_string(), shared.clone(), session.epoch(), after);
  }
  Ok(GameOut { game: snapshot_of(&session), game_over: game_over? })
}

#[instrument(level = "info", skip(state), fields(%user_id))]
pub async fn current_game(state: &Arc<AppState>, user_id: &str) -> Result<GameOut, GameError> {
  let shared = state.session(user_id).await;
  let mut session = shared.lock().await;
  session.expire_if_due();
  let ((), game_over) = settled(state, user_id, &mut session, Ok(())).await?;
  Ok(GameOut { game: snapshot_of(&session), game_over })
}

#[instrument(level = "info", skip(state), fields(%user_id))]
pub async fn use_hint(state: &Arc<AppState>, user_id: &str, index: usize) -> Result<HintOut, GameError> {
  let shared = state.existing_session(user_id).await.ok_or(GameError::NotPlaying)?;
  let mut session = shared.lock().await;
  let outcome = session.use_hint(index);
  let (used, _) = settled(state, user_id, &mut session, outcome).await?;
  Ok(HintOut { index: used.index, text: used.text, points_deducted: used.points_deducted, game: snapshot_of(&session) })
}

#[instrument(level = "info", skip(state, code), fields(%user_id, code_len = code.len()))]
pub async fn submit_code(state: &Arc<AppState>, user_id: &str, code: &str) -> Result<SubmitOut, GameError> {
  let shared = state.existing_session(user_id).await.ok_or(GameError::NotPlaying)?;
  let mut session = shared.lock().await;
  let outcome = session.submit(code, state.challenges.as_ref()).await;
  let (outcome, game_over) = settled(state, user_id, &mut session, outcome).await?;

  let (correct, points_awarded) = match outcome {
    SubmitOutcome::Advanced { points_awarded } => (true, points_awarded),
    SubmitOutcome::Missed { .. } => (false, 0),
    SubmitOutcome::Finished { correct } => (correct, 0),
  };
  Ok(SubmitOut { correct, points_awarded, game: snapshot_of(&session), game_over })
}

/// Fire `on_timer_expire` once the countdown elapses, unless the player has started
/// another session since (the epoch moved on).
pub fn spawn_timer(state: Arc<AppState>, user_id: String, session: SharedSession, epoch: u64, after: Duration) {
  tokio::spawn(async move {
    tokio::time::sleep(after).await;
    let mut s = session.lock().await;
    if s.epoch() != epoch {
      return;
    }
    s.on_timer_expire();
    match settle(&state, &user_id, &mut s).await {
      Ok(Some(report)) => {
        info!(target: "game", %user_id, score = report.result.score, unlocked = report.unlocked.len(), "Timer ended session");
      }
      Ok(None) => {}
      Err(e) => {
        error!(target: "game", %user_id, error = %e, "Failed to record timed-out session");
      }
    }
  });
}

/// Toggle a follow edge. `None` when the target is unknown.
pub fn toggle_follow(state: &AppState, follower: &str, target: &str) -> Result<Option<bool>, GameError> {
  if !state.store.user_exists(target)? {
    warn!(target: "codequest_backend", %follower, %target, "Follow target not found");
    return Ok(None);
  }
  Ok(Some(state.store.toggle_follow(follower, target)?))
}
