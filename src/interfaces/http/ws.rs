//! One WebSocket session per client.
//!
//! Inbound frames are commands (`{"serverId": …}` to subscribe, with
//! `"action": "unsubscribe"` to stop). Outbound frames are status messages
//! from the fanout, plus an error frame for commands that cannot be served.

use super::AppState;
use crate::application::fanout::{ConnectionGuard, StatusFanout};
use crate::domain::server::ServerId;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Action {
    #[default]
    Subscribe,
    Unsubscribe,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Command {
    server_id: ServerId,
    #[serde(default)]
    action: Action,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename = "error", rename_all = "camelCase")]
struct ErrorFrame {
    #[serde(skip_serializing_if = "Option::is_none")]
    server_id: Option<ServerId>,
    message: String,
}

pub(super) async fn upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| session(socket, state.fanout))
}

async fn session(socket: WebSocket, fanout: Arc<StatusFanout>) {
    let (guard, mut outbound) = fanout.connect();
    let (mut sink, mut stream) = socket.split();
    debug!(connection = guard.id(), "WebSocket session opened");

    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(message) = message else { break };
                if !send_json(&mut sink, &message).await {
                    break;
                }
            }
            frame = stream.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!(connection = guard.id(), error = %e, "WebSocket receive failed");
                        break;
                    }
                };
                if let Some(error) = apply_command(&guard, text.as_str()).await {
                    if !send_json(&mut sink, &error).await {
                        break;
                    }
                }
            }
        }
    }

    debug!(connection = guard.id(), "WebSocket session closed");
    // Dropping the guard removes every subscription of this connection.
    drop(guard);
}

async fn apply_command(guard: &ConnectionGuard, text: &str) -> Option<ErrorFrame> {
    let command: Command = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(e) => {
            return Some(ErrorFrame {
                server_id: None,
                message: format!("invalid command: {e}"),
            });
        }
    };

    match command.action {
        Action::Unsubscribe => {
            guard.unsubscribe(command.server_id);
            None
        }
        Action::Subscribe => match guard.subscribe(command.server_id).await {
            Ok(Some(_)) => None,
            Ok(None) => Some(ErrorFrame {
                server_id: Some(command.server_id),
                message: "unknown server".to_string(),
            }),
            Err(e) => {
                warn!(server_id = %command.server_id, error = %e, "Status snapshot failed");
                Some(ErrorFrame {
                    server_id: Some(command.server_id),
                    message: "status temporarily unavailable".to_string(),
                })
            }
        },
    }
}

/// Returns false once the peer can no longer be written to.
async fn send_json<S, T>(sink: &mut S, value: &T) -> bool
where
    S: SinkExt<Message> + Unpin,
    T: Serialize,
{
    match serde_json::to_string(value) {
        Ok(text) => sink.send(Message::Text(text.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to encode outbound frame");
            true
        }
    }
}
