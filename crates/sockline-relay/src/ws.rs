//! WebSocket session handling.
//!
//! Each connected client gets an outgoing frame channel registered with the
//! hub. A send task drains that channel onto the socket while a receive task
//! parses client frames and feeds the hub.

use crate::state::AppState;
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use sockline_types::{ClientFrame, ServerFrame};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outgoing frames queued per client before the hub starts dropping.
const OUTGOING_CHANNEL_DEPTH: usize = 32;

pub async fn upgrade(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    if let Err(e) = handle_socket(socket, state).await {
        tracing::error!(target: "sockline::ws", "WebSocket session error: {}", e);
    }
}

pub async fn handle_socket(socket: WebSocket, state: Arc<AppState>) -> Result<()> {
    let client_id = Uuid::new_v4();
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Claim a connection slot up front; simultaneous upgrades race for the
    // last one and exactly one wins. The slot comes back on deregister.
    if !state.hub.admit(state.config.max_connections) {
        warn!(target: "sockline::ws",
            "Refusing client {}: relay at capacity ({})", client_id, state.config.max_connections);
        let refusal = ServerFrame::Error {
            code: "capacity".to_string(),
            message: "relay at capacity".to_string(),
        };
        let json = serde_json::to_string(&refusal)?;
        ws_tx.send(Message::Text(json.into())).await?;
        let _ = ws_tx.close().await;
        return Ok(());
    }

    let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<ServerFrame>(OUTGOING_CHANNEL_DEPTH);

    // Spawn task to forward queued frames to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = outgoing_rx.recv().await {
            let json = match serde_json::to_string(&frame) {
                Ok(j) => j,
                Err(_) => continue,
            };
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                debug!(target: "sockline::ws", "Client socket closed mid-send");
                break;
            }
        }
    });

    // Replay retained history before going live so the client never sees a
    // replayed frame after a newer live one.
    state.hub.replay_to(&outgoing_tx).await;
    state.hub.register(client_id, outgoing_tx.clone());
    info!(target: "sockline::ws",
        "Client {} connected ({} online)", client_id, state.hub.client_count());

    // Handle incoming frames
    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                Message::Text(text) => {
                    let frame: ClientFrame = match serde_json::from_str(&text) {
                        Ok(frame) => frame,
                        Err(e) => {
                            debug!(target: "sockline::ws",
                                "Unparseable frame from {}: {}", client_id, e);
                            let reply = ServerFrame::Error {
                                code: "bad_frame".to_string(),
                                message: e.to_string(),
                            };
                            if outgoing_tx.send(reply).await.is_err() {
                                break;
                            }
                            continue;
                        }
                    };

                    match frame {
                        ClientFrame::Publish { id, body } => {
                            let seq = recv_state.hub.publish(body).await;
                            let ack = ServerFrame::Delivered { id, seq };
                            if outgoing_tx.send(ack).await.is_err() {
                                break;
                            }
                        }
                        ClientFrame::Ping { nonce } => {
                            if outgoing_tx.send(ServerFrame::Pong { nonce }).await.is_err() {
                                break;
                            }
                        }
                        ClientFrame::Close { code, reason } => {
                            // Stop fanning out to this client, confirm the
                            // close, then keep reading until the socket
                            // actually shuts down underneath us.
                            debug!(target: "sockline::ws",
                                "Client {} requested close ({}: {})", client_id, code, reason);
                            recv_state.hub.deregister(&client_id);
                            let confirm = ServerFrame::Closed { code, reason };
                            if outgoing_tx.send(confirm).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                Message::Close(_) => {
                    debug!(target: "sockline::ws", "Client {} closed connection", client_id);
                    break;
                }
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
        }
    }

    state.hub.deregister(&client_id);
    info!(target: "sockline::ws",
        "Client {} disconnected ({} online)", client_id, state.hub.client_count());
    Ok(())
}
