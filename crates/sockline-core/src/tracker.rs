//! Connection state machine enforcement and history capture.

use crate::error::SocklineError;
use crate::Result;
use chrono::Utc;
use sockline_types::{ConnectionState, SocketEvent, TransitionRecord};
use tracing::debug;

/// The lifecycle FSM plus two append-only ordered histories: state
/// transitions and observable events.
///
/// Tests assert on exact sequences of both, so nothing here ever reorders
/// or coalesces entries.
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    state: ConnectionState,
    transitions: Vec<TransitionRecord>,
    events: Vec<SocketEvent>,
}

impl ConnectionTracker {
    /// A fresh tracker in `Disconnected` with empty histories.
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            transitions: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Move to `to`, recording the edge and what drove it. Fails without
    /// touching state or history when the edge is not in the transition
    /// relation.
    pub fn transition(&mut self, to: ConnectionState, cause: impl Into<String>) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(SocklineError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        let record = TransitionRecord {
            from: self.state,
            to,
            cause: cause.into(),
            at: Utc::now(),
        };
        debug!(
            target: "sockline::conn",
            "{} -> {} ({})", record.from, record.to, record.cause
        );
        self.state = to;
        self.transitions.push(record);
        Ok(())
    }

    pub fn record_event(&mut self, event: SocketEvent) {
        self.events.push(event);
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    pub fn events(&self) -> &[SocketEvent] {
        &self.events
    }

    /// Tags of the recorded events, in order.
    pub fn event_kinds(&self) -> Vec<&'static str> {
        self.events.iter().map(SocketEvent::kind).collect()
    }
}
