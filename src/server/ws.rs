//! WebSocket endpoint: authenticates the connection, registers it with the
//! session router, and bridges inbound frames to the work queue and
//! outbound events to the socket.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::{WsIncoming, WS_APP_PROTOCOL, WS_TOKEN_PREFIX};
use crate::session::SessionRouter;
use crate::state::AppState;

/// Per-connection outbound buffer. A client that stops reading long enough
/// to fill it surfaces as a transient delivery failure upstream.
const OUTBOUND_BUFFER: usize = 256;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    // Identity must be verified before the socket carries any input.
    let principal = match extract_token_from_protocol_header(&headers) {
        Some(token) => state.auth.verify(&token).await.ok(),
        None => None,
    };

    ws.protocols([WS_APP_PROTOCOL])
        .on_upgrade(move |socket| handle_socket(socket, state, principal))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, principal: Option<String>) {
    let (mut sender, mut receiver) = socket.split();

    let Some(user_id) = principal else {
        let _ = sender
            .send(Message::Close(Some(CloseFrame {
                code: 4001,
                reason: "Unauthorized".into(),
            })))
            .await;
        return;
    };

    let connection_id = Uuid::new_v4().to_string();
    let (tx, mut rx) = mpsc::channel(OUTBOUND_BUFFER);
    state.registry.connect(&connection_id, &user_id, tx);
    tracing::info!(connection = %connection_id, user = %user_id, "connection opened");

    // Writer task: drains the outbound channel in order onto the socket.
    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let router = SessionRouter::new(state.registry.clone(), state.queue.clone());
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                let incoming = match serde_json::from_str::<WsIncoming>(&text) {
                    Ok(incoming) => incoming,
                    Err(err) => {
                        tracing::warn!(connection = %connection_id, %err, "ignoring malformed frame");
                        continue;
                    }
                };
                if let Err(err) = router.route_input(&connection_id, incoming).await {
                    tracing::error!(connection = %connection_id, %err, "failed to route input");
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.registry.disconnect(&connection_id);
    tracing::info!(connection = %connection_id, "connection closed");
    // The registry held the last long-lived sender; the writer exits once
    // in-flight deliveries drop their clones.
    let _ = writer.await;
}

fn extract_token_from_protocol_header(headers: &HeaderMap) -> Option<String> {
    let protocol_header = headers.get("sec-websocket-protocol")?.to_str().ok()?;
    for item in protocol_header.split(',') {
        let protocol = item.trim();
        let Some(token) = protocol.strip_prefix(WS_TOKEN_PREFIX) else {
            continue;
        };
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }
    None
}
