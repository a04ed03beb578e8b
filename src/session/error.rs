//! Session store errors

use thiserror::Error;

use super::state::ConnectState;

/// Result type for session store operations
pub type Result<T> = std::result::Result<T, SessionError>;

/// Session store errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// No session with this id
    #[error("Session not found: {0}")]
    NotFound(u32),

    /// Edge not allowed by the connect-state machine
    #[error("Invalid transition for session {session_id}: {from} -> {to}")]
    InvalidTransition {
        /// Session id
        session_id: u32,
        /// Current state
        from: ConnectState,
        /// Requested state
        to: ConnectState,
    },

    /// Session moved on since the caller looked at it
    #[error("Session {0} changed since it was inspected")]
    Changed(u32),
}
