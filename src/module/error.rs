//! Module Manager Error Types

use std::path::PathBuf;

use thiserror::Error;

/// Result type for module operations
pub type Result<T> = std::result::Result<T, ModuleError>;

/// Module lifecycle errors
#[derive(Error, Debug)]
pub enum ModuleError {
    /// No descriptor registered under this name
    #[error("Unknown module: {0}")]
    UnknownModule(String),

    /// A descriptor with this name is already registered
    #[error("Module already registered: {0}")]
    DuplicateModule(String),

    /// Descriptor file could not be parsed
    #[error("Invalid module descriptor {path}: {reason}")]
    InvalidDescriptor {
        /// Descriptor file
        path: PathBuf,
        /// Parse or validation failure
        reason: String,
    },

    /// Descriptor targets another plugin ABI
    #[error("Module API version mismatch for {name}: expected {expected}, found {found}")]
    ApiVersionMismatch {
        /// Module name
        name: String,
        /// Version this manager speaks
        expected: u32,
        /// Version declared by the descriptor
        found: u32,
    },

    /// Search pattern is not a valid glob
    #[error("Invalid module search pattern: {0}")]
    InvalidPattern(String),

    /// Backend could not be brought up
    #[error("Module start failed for session {session_id}: {reason}")]
    StartFailed {
        /// Session the backend was started for
        session_id: u32,
        /// What went wrong
        reason: String,
    },

    /// Backend did not stop cleanly
    #[error("Module stop failed for session {session_id}: {reason}")]
    StopFailed {
        /// Session the backend belongs to
        session_id: u32,
        /// What went wrong
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
