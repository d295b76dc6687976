//! CodeQuest · Debugging Trivia Backend
//!
//! - Axum HTTP + WebSocket API
//! - Timed game sessions with achievements, persisted in SQLite
//! - Optional OpenAI challenge generation (via environment variables)
//! - Static SPA fallback (./static/index.html)
//!
//! Important env variables:
//!   PORT              : u16 (default 3000)
//!   DATABASE_PATH     : SQLite file (default "codequest.db")
//!   CODEQUEST_CONFIG  : path to TOML config (prompts, game rules, challenge bank, achievements)
//!   OPENAI_API_KEY    : enables OpenAI challenge generation if present
//!   OPENAI_BASE_URL   : default "https://api.openai.com/v1"
//!   OPENAI_MODEL      : default "gpt-3.5-turbo"
//!   LOG_LEVEL         : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT        : "pretty" (default) or "json"

mod telemetry;
mod util;
mod domain;
mod error;
mod config;
mod seeds;
mod achievements;
mod game;
mod store;
mod openai;
mod state;
mod protocol;
mod logic;
mod routes;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, instrument};

use crate::routes::build_router;
use crate::state::AppState;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
  telemetry::init_tracing();

  // Build shared application state (store, achievement catalog, challenge source).
  let state = Arc::new(AppState::new()?);

  // Build the HTTP router with routes, CORS and tracing layers.
  let app = build_router(state.clone());

  // Read port from env or default to 3000.
  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "codequest_backend", %addr, "HTTP server listening");
  axum::serve(listener, app).await?;
  Ok(())
}
