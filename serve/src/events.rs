//! Multiplexed events WebSocket: one channel for filesystem, asset,
//! container and task events, each wrapped in a `{type, payload, ts}`
//! envelope. The socket only pushes; client frames other than close/ping
//! are ignored.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use serde::Serialize;

use crate::AppState;

#[derive(Clone, Debug, Serialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: serde_json::Value,
    /// Milliseconds since Unix epoch.
    pub ts: i64,
}

impl EventEnvelope {
    pub fn now(kind: &str, payload: serde_json::Value) -> Self {
        EventEnvelope {
            kind: kind.to_string(),
            payload,
            ts: chrono::Utc::now().timestamp_millis(),
        }
    }
}

pub async fn ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let rx = state.events.subscribe();
    ws.on_upgrade(move |socket| handle_socket(socket, rx))
}

async fn handle_socket(
    mut socket: WebSocket,
    mut rx: tokio::sync::broadcast::Receiver<EventEnvelope>,
) {
    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(envelope) => {
                        let Ok(text) = serde_json::to_string(&envelope) else { continue };
                        if socket.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "events socket lagged, frames dropped");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            frame = socket.recv() => {
                match frame {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }
}
