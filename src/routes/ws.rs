//! WebSocket upgrade + message loop. Each client message is parsed as JSON and
//! forwarded to core logic. We reply with a single JSON message per request.
//!
//! The player is identified once, at upgrade time, from the identity headers or the
//! `userId`/`userName` query parameters.

use std::sync::Arc;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    Query, State, WebSocketUpgrade,
  },
  http::HeaderMap,
  response::{IntoResponse, Response},
};
use tracing::{info, error, instrument, debug};

use crate::error::GameError;
use crate::logic;
use crate::protocol::{ClientWsMessage, ServerWsMessage, WsIdentityQuery};
use crate::routes::{identity, ApiError};
use crate::state::AppState;

#[instrument(level = "info", skip(ws, state, headers))]
pub async fn ws_upgrade(
  ws: WebSocketUpgrade,
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  Query(q): Query<WsIdentityQuery>,
) -> Result<Response, ApiError> {
  let (user_id, name) = identity(&headers)
    .or_else(|| q.user_id.filter(|id| !id.trim().is_empty()).map(|id| (id.trim().to_string(), q.user_name)))
    .ok_or(ApiError::Unauthorized)?;
  state.store.ensure_user(&user_id, name.as_deref())?;
  info!(target: "codequest_backend", %user_id, "WebSocket upgrade requested");
  Ok(ws.on_upgrade(move |socket| handle_ws(socket, state, user_id)).into_response())
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>, user_id: String) {
  info!(target: "codequest_backend", %user_id, "WebSocket connected");
  while let Some(Ok(msg)) = socket.recv().await {
    match msg {
      Message::Text(txt) => {
        // Parse, dispatch, serialize response.
        let reply_msg = match serde_json::from_str::<ClientWsMessage>(&txt) {
          Ok(incoming) => {
            debug!(target: "codequest_backend", "WS received: {:?}", &incoming);
            handle_client_ws(incoming, &state, &user_id).await
          }
          Err(e) => ServerWsMessage::Error { code: "invalid_json".into(), message: format!("Invalid JSON: {}", e) },
        };

        let out = serde_json::to_string(&reply_msg).unwrap_or_else(|e| {
          serde_json::json!({ "type": "error", "code": "serialization", "message": format!("Serialization error: {}", e) }).to_string()
        });

        if let Err(e) = socket.send(Message::Text(out)).await {
          error!(target: "codequest_backend", error = %e, "WS send error");
          break;
        }
      }
      Message::Ping(payload) => { let _ = socket.send(Message::Pong(payload)).await; }
      Message::Close(_) => break,
      _ => {}
    }
  }
  info!(target: "codequest_backend", %user_id, "WebSocket disconnected");
}

fn error_msg(e: GameError) -> ServerWsMessage {
  ServerWsMessage::Error { code: e.code().to_string(), message: e.to_string() }
}

#[instrument(level = "info", skip(state))]
async fn handle_client_ws(msg: ClientWsMessage, state: &Arc<AppState>, user_id: &str) -> ServerWsMessage {
  match msg {
    ClientWsMessage::Ping => ServerWsMessage::Pong,

    ClientWsMessage::StartGame => match logic::start_game(state, user_id).await {
      Ok(out) => {
        info!(target: "game", %user_id, "WS game started");
        ServerWsMessage::Game { game: out.game, game_over: out.game_over }
      }
      Err(e) => error_msg(e),
    },

    ClientWsMessage::UseHint { index } => match logic::use_hint(state, user_id, index).await {
      Ok(hint) => ServerWsMessage::Hint { hint },
      Err(e) => error_msg(e),
    },

    ClientWsMessage::Submit { code } => match logic::submit_code(state, user_id, &code).await {
      Ok(result) => {
        info!(target: "game", %user_id, correct = result.correct, over = result.game_over.is_some(), "WS submission evaluated");
        ServerWsMessage::SubmitResult { result }
      }
      Err(e) => error_msg(e),
    },

    ClientWsMessage::State => match logic::current_game(state, user_id).await {
      Ok(out) => ServerWsMessage::Game { game: out.game, game_over: out.game_over },
      Err(e) => error_msg(e),
    },
  }
}
