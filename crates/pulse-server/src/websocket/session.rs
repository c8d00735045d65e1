//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use super::connection::Connection;
use super::transport::{ChannelTransport, Outbound, Transport};
use crate::server::AppState;

/// How long the writer may take to flush after the session ends.
const WRITER_DRAIN: Duration = Duration::from_secs(1);

/// Messages a dashboard client may send.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Ping {
        #[serde(default)]
        timestamp: Option<Value>,
    },
    RequestMetrics,
}

/// GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_ws_session(socket, state))
}

/// Run a session for an upgraded socket.
///
/// Outbound frames go through a [`ChannelTransport`] drained by one writer
/// task, so the registry and broadcast bus never touch the socket.
#[instrument(skip_all, fields(client_id))]
pub async fn run_ws_session(ws: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (transport, mut outbound_rx) = ChannelTransport::new(state.config.send_queue_capacity);
    let transport: Arc<dyn Transport> = Arc::new(transport);

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let (message, last) = match frame {
                Outbound::Text(text) => (Message::Text(String::clone(&text).into()), false),
                Outbound::Close { code, reason } => (
                    Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })),
                    true,
                ),
            };
            if ws_tx.send(message).await.is_err() || last {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let connection = match state.registry.connect(Arc::clone(&transport), None).await {
        Ok(connection) => Some(connection),
        Err(e) => {
            debug!(error = %e, "connection refused");
            None
        }
    };

    if let Some(connection) = connection {
        let _ = tracing::Span::current().record("client_id", connection.id.as_str());
        loop {
            tokio::select! {
                () = connection.closed() => {
                    debug!("connection closed by server");
                    break;
                }
                inbound = ws_rx.next() => match inbound {
                    Some(Ok(Message::Text(text))) => handle_text(&state, &connection, text.as_str()),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "websocket read failed");
                        break;
                    }
                },
            }
        }
        let _ = state.registry.disconnect(&connection.id);
    }

    // Dropping the last sender lets the writer finish.
    drop(transport);
    if tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
        writer.abort();
    }
}

/// Handle one inbound text frame.
fn handle_text(state: &AppState, connection: &Connection, text: &str) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Ping { timestamp }) => {
            state.registry.update_heartbeat(&connection.id);
            let timestamp = timestamp
                .filter(|t| !t.is_null())
                .unwrap_or_else(|| Value::from(Utc::now().timestamp_millis()));
            let _ = state
                .bus
                .send_to(&connection.id, &json!({"type": "pong", "timestamp": timestamp}));
        }
        Ok(ClientMessage::RequestMetrics) => {
            if connection.try_claim_metrics_slot(state.config.metrics_min_gap) {
                let _ = state.sampler.send_to(&connection.id);
            } else {
                debug!("metrics request rate limited");
            }
        }
        Err(_) => debug!(len = text.len(), "ignoring unrecognised client message"),
    }
}
