//! WebSocket handler for voice sessions
//!
//! The socket layer stays thin: it parses inbound JSON into
//! [`ClientCommand`]s, serializes [`ServerEvent`]s back out, and enforces
//! the configured transport limits. All session logic lives in
//! [`ConnectionSession`].

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use super::ApiState;
use crate::protocol::{ClientCommand, ServerEvent};
use crate::session::ConnectionSession;

/// Build WebSocket router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new().route("/ws", get(ws_upgrade)).with_state(state)
}

/// Handle WebSocket upgrade request
async fn ws_upgrade(State(state): State<Arc<ApiState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let max = state.limits.max_message_bytes;
    ws.max_message_size(max)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle one WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<ApiState>) {
    let (mut sender, mut receiver) = socket.split();

    let (event_tx, mut event_rx) = mpsc::channel::<ServerEvent>(32);
    let (cmd_tx, cmd_rx) = mpsc::channel::<ClientCommand>(64);

    let mut session = ConnectionSession::new(
        Arc::clone(&state.validator),
        state.engines.clone(),
        event_tx,
    );
    let session_id = session.id().to_string();
    tracing::info!(session_id = %session_id, "WebSocket connected");

    // forward session events to the socket, in order
    let send_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if let Ok(text) = serde_json::to_string(&event) {
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    });

    // parse inbound frames into commands
    let idle_timeout = state.limits.idle_timeout;
    let sid = session_id.clone();
    let recv_task = tokio::spawn(async move {
        loop {
            let next = if let Some(limit) = idle_timeout {
                match tokio::time::timeout(limit, receiver.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        tracing::info!(session_id = %sid, "idle timeout, closing");
                        break;
                    }
                }
            } else {
                receiver.next().await
            };

            let Some(Ok(msg)) = next else { break };

            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(cmd) => {
                        if cmd_tx.send(cmd).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        // malformed message: log and ignore; no state change,
                        // no outbound traffic
                        tracing::warn!(session_id = %sid, error = %e, "ignoring malformed message");
                    }
                },
                Message::Close(_) => {
                    tracing::info!(session_id = %sid, "WebSocket closed by client");
                    break;
                }
                _ => {}
            }
        }
    });

    let session_task = tokio::spawn(async move {
        session.run(cmd_rx).await;
    });

    // the session decides when the connection is over; the send task then
    // drains any in-flight turn before the socket drops
    let _ = session_task.await;
    let _ = send_task.await;
    recv_task.abort();

    tracing::info!(session_id = %session_id, "WebSocket disconnected");
}
