//! Error types for sockline.

use sockline_types::ConnectionState;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SocklineError {
    #[error("Connect refused by peer: {0}")]
    ConnectRefused(String),

    #[error("Connect attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Cannot send while {0}: connection is closed")]
    SendOnClosed(ConnectionState),

    #[error("Reconnect gave up after {attempts} attempts: {last_error}")]
    RetryBudgetExhausted { attempts: u32, last_error: String },

    #[error("Pending operation aborted by close")]
    Aborted,

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },

    #[error("Timed out waiting for {0}")]
    WaitTimeout(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_states() {
        let err = SocklineError::SendOnClosed(ConnectionState::Disconnected);
        assert_eq!(
            err.to_string(),
            "Cannot send while disconnected: connection is closed"
        );

        let err = SocklineError::InvalidTransition {
            from: ConnectionState::Disconnected,
            to: ConnectionState::Connected,
        };
        assert_eq!(err.to_string(), "Invalid transition: disconnected -> connected");
    }

    #[test]
    fn test_budget_exhausted_reports_attempts() {
        let err = SocklineError::RetryBudgetExhausted {
            attempts: 4,
            last_error: "Connect refused by peer: scripted".to_string(),
        };
        assert!(err.to_string().contains("4 attempts"));
    }
}
