//! Observable socket events, recorded in order for test assertions.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Something observable happened on the socket.
///
/// Events are appended to the harness history in the order they occur and
/// fanned out to subscribers; assertions read either side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SocketEvent {
    /// Link established. `attempt` is the 1-based attempt number within the
    /// connect or reconnect call that succeeded.
    Open { attempt: u32 },
    /// Link failed.
    Error { reason: String },
    /// Orderly shutdown completed.
    Close { code: u16, reason: String },
    /// Receipt arrived for an in-flight publish.
    Delivered { id: Uuid, seq: u64 },
    /// Broadcast message arrived from the peer.
    Message { seq: u64, body: String },
    /// Keepalive round trip completed.
    Pong { nonce: u64 },
}

impl SocketEvent {
    /// The snake_case tag, handy for asserting on event histories.
    pub fn kind(&self) -> &'static str {
        match self {
            SocketEvent::Open { .. } => "open",
            SocketEvent::Error { .. } => "error",
            SocketEvent::Close { .. } => "close",
            SocketEvent::Delivered { .. } => "delivered",
            SocketEvent::Message { .. } => "message",
            SocketEvent::Pong { .. } => "pong",
        }
    }
}
