//! Call handler errors

use thiserror::Error;

use crate::auth::AuthError;
use crate::module::ModuleError;
use crate::rpc::{PeerId, RpcError};
use crate::session::SessionError;

/// Result type for call handlers
pub type Result<T> = std::result::Result<T, CallError>;

/// Failure of a call; turned into a `Failed` response by the dispatcher
#[derive(Error, Debug)]
pub enum CallError {
    /// Payload could not be decoded
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Response could not be encoded
    #[error("Failed to encode response: {0}")]
    Encode(String),

    /// Outbound response could not be decoded
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// No session with this id
    #[error("Session {0} not found")]
    SessionNotFound(u32),

    /// No connection with this id
    #[error("Connection {0} not found")]
    ConnectionNotFound(u32),

    /// Credentials rejected
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(#[from] AuthError),

    /// Session store rejected the operation
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Backend module failure
    #[error(transparent)]
    Module(#[from] ModuleError),

    /// Outbound call failure
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// Peer owning a connection has gone away
    #[error("Peer {0} is not connected")]
    PeerUnavailable(PeerId),

    /// Operation not valid in the current session state
    #[error("{0}")]
    Failed(String),
}
