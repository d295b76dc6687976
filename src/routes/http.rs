//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented and logs include parameters and basic result info.

use std::sync::Arc;
use axum::{extract::{Path, Query, State}, Json, response::IntoResponse};
use tracing::{info, instrument};

use crate::domain::Difficulty;
use crate::logic;
use crate::protocol::*;
use crate::routes::{ApiError, Player};
use crate::state::AppState;
use crate::store::{LeaderboardEntry, Profile, UnlockedAchievementRecord};

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse { Json(HealthOut { ok: true }) }

/// One-off challenge outside any session.
#[instrument(level = "info", skip(state), fields(level = body.level))]
pub async fn http_post_challenge(
  State(state): State<Arc<AppState>>,
  Json(body): Json<ChallengeIn>,
) -> Result<Json<ChallengeOut>, ApiError> {
  let ch = state.challenges.request_challenge(body.level.max(1)).await?;
  info!(target: "challenge", level = body.level, id = %ch.id, "HTTP challenge served");
  Ok(Json(to_out(&ch, &[])))
}

/// Sessions always begin at level 1; any request body is ignored.
#[instrument(level = "info", skip(state, player), fields(user_id = %player.id))]
pub async fn http_post_start(
  State(state): State<Arc<AppState>>,
  player: Player,
) -> Result<Json<GameOut>, ApiError> {
  Ok(Json(logic::start_game(&state, &player.id).await?))
}

#[instrument(level = "info", skip(state, player), fields(user_id = %player.id))]
pub async fn http_get_game(
  State(state): State<Arc<AppState>>,
  player: Player,
) -> Result<Json<GameOut>, ApiError> {
  Ok(Json(logic::current_game(&state, &player.id).await?))
}

#[instrument(level = "info", skip(state, player, body), fields(user_id = %player.id, index = body.index))]
pub async fn http_post_hint(
  State(state): State<Arc<AppState>>,
  player: Player,
  Json(body): Json<HintIn>,
) -> Result<Json<HintOut>, ApiError> {
  Ok(Json(logic::use_hint(&state, &player.id, body.index).await?))
}

#[instrument(level = "info", skip(state, player, body), fields(user_id = %player.id, code_len = body.code.len()))]
pub async fn http_post_submit(
  State(state): State<Arc<AppState>>,
  player: Player,
  Json(body): Json<SubmitIn>,
) -> Result<Json<SubmitOut>, ApiError> {
  let out = logic::submit_code(&state, &player.id, &body.code).await?;
  info!(target: "game", user_id = %player.id, correct = out.correct, over = out.game_over.is_some(), "HTTP submission evaluated");
  Ok(Json(out))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_leaderboard(
  State(state): State<Arc<AppState>>,
  Query(q): Query<LeaderboardQuery>,
) -> Result<Json<Vec<LeaderboardEntry>>, ApiError> {
  let difficulty = match q.difficulty.as_deref().map(str::trim) {
    None | Some("") | Some("all") | Some("All") => None,
    Some(raw) => Some(Difficulty::parse(raw).ok_or_else(|| ApiError::BadRequest(format!("unknown difficulty '{raw}'")))?),
  };
  Ok(Json(state.store.leaderboard(difficulty)?))
}

#[instrument(level = "info", skip(state, viewer))]
pub async fn http_get_profile(
  State(state): State<Arc<AppState>>,
  Path(user_id): Path<String>,
  viewer: Option<Player>,
) -> Result<Json<Profile>, ApiError> {
  let viewer = viewer.map(|p| p.id);
  state
    .store
    .profile(&user_id, viewer.as_deref())?
    .map(Json)
    .ok_or_else(|| ApiError::NotFound(format!("user '{user_id}'")))
}

#[instrument(level = "info", skip(state, player, body), fields(user_id = %player.id, target = %body.target_user_id))]
pub async fn http_post_follow(
  State(state): State<Arc<AppState>>,
  player: Player,
  Json(body): Json<FollowIn>,
) -> Result<Json<FollowOut>, ApiError> {
  if body.target_user_id == player.id {
    return Err(ApiError::BadRequest("cannot follow yourself".into()));
  }
  let following = logic::toggle_follow(&state, &player.id, &body.target_user_id)?
    .ok_or_else(|| ApiError::NotFound(format!("user '{}'", body.target_user_id)))?;
  info!(target: "codequest_backend", user_id = %player.id, target = %body.target_user_id, following, "Follow toggled");
  Ok(Json(FollowOut { following }))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_achievements(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  let out: Vec<AchievementOut> = state.engine.catalog().iter().map(achievement_out).collect();
  Json(out)
}

#[instrument(level = "info", skip(state, player), fields(user_id = %player.id))]
pub async fn http_get_my_achievements(
  State(state): State<Arc<AppState>>,
  player: Player,
) -> Result<Json<Vec<UnlockedAchievementRecord>>, ApiError> {
  Ok(Json(state.store.user_achievements(&player.id)?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_post_init_achievements(State(state): State<Arc<AppState>>) -> Result<Json<InitOut>, ApiError> {
  let count = state.store.sync_catalog(state.engine.catalog())?;
  Ok(Json(InitOut { success: true, count }))
}
