//! Connection lifecycle states and transition records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a chat socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No link to the peer. Initial state, and where every session ends.
    #[default]
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// Link is open; sends go straight to the peer.
    Connected,
    /// The link failed; a reconnect may be attempted.
    Error,
    /// An orderly shutdown is in progress.
    Closing,
    /// A reconnect attempt is in flight after a failure.
    Reconnecting,
}

impl ConnectionState {
    /// Whether `next` is a legal successor of this state.
    ///
    /// Failed connect attempts fall back to `Disconnected`; only failures of
    /// an established link reach `Error`. An exhausted reconnect budget also
    /// lands in `Disconnected`.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Error)
                | (Connected, Closing)
                | (Error, Reconnecting)
                | (Error, Disconnected)
                | (Reconnecting, Connected)
                | (Reconnecting, Disconnected)
                | (Closing, Disconnected)
        )
    }

    /// Snake_case name, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
            ConnectionState::Closing => "closing",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Code and reason carried on an orderly shutdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

impl CloseFrame {
    /// Normal closure.
    pub const NORMAL: u16 = 1000;
    /// Endpoint is going away.
    pub const GOING_AWAY: u16 = 1001;
    /// Protocol violation.
    pub const PROTOCOL_ERROR: u16 = 1002;
    /// Link dropped without a close handshake.
    pub const ABNORMAL: u16 = 1006;

    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Normal closure with an empty reason.
    pub fn normal() -> Self {
        Self::new(Self::NORMAL, "")
    }
}

/// One entry in the ordered transition history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: ConnectionState,
    pub to: ConnectionState,
    /// Operation or stimulus that drove the edge, e.g. `connect` or
    /// `peer_error: connection reset`.
    pub cause: String,
    pub at: DateTime<Utc>,
}
