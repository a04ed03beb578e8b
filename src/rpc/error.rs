//! RPC Error Types
//!
//! Errors raised by the framer, the envelope codec and the connection layer.

use thiserror::Error;

use super::envelope::CallStatus;

/// Result type for RPC operations
pub type Result<T> = std::result::Result<T, RpcError>;

/// RPC transport and protocol errors
#[derive(Error, Debug)]
pub enum RpcError {
    /// Peer closed the channel (clean EOF or reset)
    #[error("Channel closed by peer")]
    ChannelClosed,

    /// Frame length prefix exceeds the configured maximum
    #[error("Frame exceeds maximum message size of {max} bytes")]
    FrameTooLarge {
        /// Configured maximum
        max: usize,
    },

    /// Envelope could not be decoded
    #[error("Malformed envelope: {0}")]
    Malformed(String),

    /// Envelope carries a schema version we do not speak
    #[error("Unsupported envelope version: {0}")]
    UnsupportedVersion(u8),

    /// No response arrived in time
    #[error("Call timed out after {0}ms")]
    Timeout(u64),

    /// Remote side answered with a non-success status
    #[error("Remote call failed ({status}): {description}")]
    Remote {
        /// Status carried by the response envelope
        status: CallStatus,
        /// Error description carried by the response envelope
        description: String,
    },

    /// Underlying socket error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RpcError {
    /// True for errors caused by the peer violating the wire format.
    ///
    /// These close the connection without being treated as a transport fault.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            RpcError::FrameTooLarge { .. } | RpcError::Malformed(_) | RpcError::UnsupportedVersion(_)
        )
    }

    /// Map a socket error onto the closed/IO split used by the serve loop
    pub(crate) fn from_io(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::UnexpectedEof
            | ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted => RpcError::ChannelClosed,
            _ => RpcError::Io(err),
        }
    }
}
