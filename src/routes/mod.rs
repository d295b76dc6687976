//! Router assembly: HTTP endpoints, WebSocket upgrade, static files, CORS, and HTTP tracing.
//! Also hosts the player extractor and the API error type shared by the handlers.

use std::sync::Arc;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{error, warn, Level};

use crate::error::GameError;
use crate::protocol::ErrorOut;
use crate::state::AppState;

pub mod http;
pub mod ws;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_NAME_HEADER: &str = "x-user-name";

/// Build the application router with:
/// - WebSocket at `/ws`
/// - REST-ish API under `/api/v1/...`
/// - Static SPA from `./static` with index fallback
/// - CORS (allow any origin/method/headers)
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
    // Static files with SPA fallback
    let static_service = ServeDir::new("./static")
        .append_index_html_on_directories(true)
        .not_found_service(ServeFile::new("./static/index.html"));

    Router::new()
        // WebSocket
        .route("/ws", get(ws::ws_upgrade))
        // HTTP API
        .route("/api/v1/health", get(http::http_health))
        .route("/api/v1/challenge", post(http::http_post_challenge))
        .route("/api/v1/game", get(http::http_get_game))
        .route("/api/v1/game/start", post(http::http_post_start))
        .route("/api/v1/game/hint", post(http::http_post_hint))
        .route("/api/v1/game/submit", post(http::http_post_submit))
        .route("/api/v1/leaderboard", get(http::http_get_leaderboard))
        .route("/api/v1/profile/:user_id", get(http::http_get_profile))
        .route("/api/v1/follow", post(http::http_post_follow))
        .route("/api/v1/achievements", get(http::http_get_achievements))
        .route("/api/v1/achievements/me", get(http::http_get_my_achievements))
        .route("/api/v1/achievements/init", post(http::http_post_init_achievements))
        // State + CORS + HTTP tracing
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        // Frontend fallback
        .fallback_service(static_service)
}

/// Errors surfaced by HTTP handlers, rendered as `{ "error", "code" }`.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    NotFound(String),
    BadRequest(String),
    Game(GameError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Game(e) => match e {
                GameError::InvalidIndex(_) => StatusCode::BAD_REQUEST,
                GameError::AlreadyUsed(_) | GameError::NotPlaying => StatusCode::CONFLICT,
                GameError::GenerationFailure(_) => StatusCode::BAD_GATEWAY,
                GameError::PersistenceFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn body(&self) -> ErrorOut {
        let (error, code) = match self {
            ApiError::Unauthorized => (format!("missing {USER_ID_HEADER} header"), "unauthorized"),
            ApiError::NotFound(what) => (format!("{what} not found"), "not_found"),
            ApiError::BadRequest(msg) => (msg.clone(), "bad_request"),
            ApiError::Game(e) => (e.to_string(), e.code()),
        };
        ErrorOut { error, code: code.to_string() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(target: "codequest_backend", %status, error = ?self, "Request failed");
        } else {
            warn!(target: "codequest_backend", %status, error = ?self, "Request rejected");
        }
        (status, Json(self.body())).into_response()
    }
}

impl From<GameError> for ApiError {
    fn from(e: GameError) -> Self {
        ApiError::Game(e)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Game(GameError::from(e))
    }
}

/// Authenticated player, read from the identity headers. The user row is created on
/// first sight.
#[derive(Clone, Debug)]
pub struct Player {
    pub id: String,
}

/// Identity from the request headers: `(user_id, display_name)`.
pub fn identity(headers: &HeaderMap) -> Option<(String, Option<String>)> {
    let text = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    Some((text(USER_ID_HEADER)?, text(USER_NAME_HEADER)))
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Player {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let (id, name) = identity(&parts.headers).ok_or(ApiError::Unauthorized)?;
        state.store.ensure_user(&id, name.as_deref())?;
        Ok(Player { id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::achievements::{build_catalog, AchievementEngine};
    use crate::config::GameRules;
    use crate::game::test_support::{ManualClock, StubProvider};
    use crate::seeds::{default_achievement_rows, seed_challenges};
    use crate::store::Store;

    fn app() -> Router {
        let store = Store::open_in_memory().unwrap();
        let engine = AchievementEngine::new(build_catalog(default_achievement_rows())).unwrap();
        store.sync_catalog(engine.catalog()).unwrap();
        let state = AppState::with_parts(store, engine, Arc::new(StubProvider::default()), GameRules::default(), ManualClock::new());
        build_router(Arc::new(state))
    }

    async fn call(app: &Router, method: &str, uri: &str, user: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(u) = user {
            req = req.header(USER_ID_HEADER, u).header(USER_NAME_HEADER, format!("{u} name"));
        }
        let req = match body {
            Some(b) => req.header("content-type", "application/json").body(Body::from(b.to_string())).unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, value)
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = app();
        let (status, body) = call(&app, "GET", "/api/v1/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn game_routes_require_identity() {
        let app = app();
        let (status, body) = call(&app, "POST", "/api/v1/game/start", None, Some(json!({}))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "unauthorized");
    }

    #[tokio::test]
    async fn play_through_and_see_leaderboard() {
        let app = app();
        let (status, body) = call(&app, "POST", "/api/v1/game/start", Some("ada"), Some(json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["game"]["phase"], "playing");
        assert_eq!(body["game"]["stats"]["lives"], 3);
        assert!(body["game"]["challenge"]["hints"][0].get("text").is_none());

        let (status, body) = call(&app, "POST", "/api/v1/game/hint", Some("ada"), Some(json!({ "index": 0 }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pointsDeducted"], 20);
        let (status, body) = call(&app, "POST", "/api/v1/game/hint", Some("ada"), Some(json!({ "index": 0 }))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "already_used");
        let (status, _) = call(&app, "POST", "/api/v1/game/hint", Some("ada"), Some(json!({ "index": 9 }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        for _ in 0..3 {
            let (_, body) = call(&app, "POST", "/api/v1/game/submit", Some("ada"), Some(json!({ "code": "nope" }))).await;
            assert_eq!(body["correct"], false);
        }
        let (_, body) = call(&app, "GET", "/api/v1/game", Some("ada"), None).await;
        assert_eq!(body["game"]["phase"], "game_over");

        let (status, body) = call(&app, "GET", "/api/v1/leaderboard", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["id"], "ada");

        let (status, body) = call(&app, "GET", "/api/v1/achievements/me", Some("ada"), None).await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = body.as_array().unwrap().iter().filter_map(|a| a["name"].as_str()).collect();
        assert_eq!(names, vec!["Speed Demon", "First Steps"]);
    }

    #[tokio::test]
    async fn start_ignores_a_requested_level() {
        let app = app();
        let (status, body) = call(&app, "POST", "/api/v1/game/start", Some("ada"), Some(json!({ "level": 3 }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["game"]["stats"]["level"], 1);
        assert_eq!(body["game"]["challenge"]["difficulty"], "Easy");
    }

    #[tokio::test]
    async fn submit_without_game_conflicts() {
        let app = app();
        let (status, body) = call(&app, "POST", "/api/v1/game/submit", Some("ada"), Some(json!({ "code": "x" }))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "not_playing");
    }

    #[tokio::test]
    async fn challenge_preview_hides_solution() {
        let app = app();
        let (status, body) = call(&app, "POST", "/api/v1/challenge", None, Some(json!({ "level": 3 }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["difficulty"], "Hard");
        let hard = seed_challenges().into_iter().find(|c| c.id == "seed-hard-binsearch").unwrap();
        assert!(!body.to_string().contains(&hard.solution_code));
    }

    #[tokio::test]
    async fn follow_and_profile() {
        let app = app();
        call(&app, "GET", "/api/v1/game", Some("bob"), None).await;
        let (status, body) = call(&app, "POST", "/api/v1/follow", Some("ada"), Some(json!({ "targetUserId": "bob" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["following"], true);

        let (status, body) = call(&app, "GET", "/api/v1/profile/bob", Some("ada"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["followers"], 1);
        assert_eq!(body["isFollowing"], true);

        let (status, _) = call(&app, "POST", "/api/v1/follow", Some("ada"), Some(json!({ "targetUserId": "ghost" }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&app, "POST", "/api/v1/follow", Some("ada"), Some(json!({ "targetUserId": "ada" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = call(&app, "GET", "/api/v1/profile/ghost", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn leaderboard_rejects_unknown_difficulty() {
        let app = app();
        let (status, _) = call(&app, "GET", "/api/v1/leaderboard?difficulty=Impossible", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn catalog_and_init() {
        let app = app();
        let (_, body) = call(&app, "GET", "/api/v1/achievements", None, None).await;
        assert_eq!(body.as_array().unwrap().len(), 6);
        assert_eq!(body[3]["condition"]["type"], "hints");
        let (status, body) = call(&app, "POST", "/api/v1/achievements/init", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["count"], 6);
    }
}
