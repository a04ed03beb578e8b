//! # freerds-session-manager
//!
//! Session broker for a multi-user remote desktop server. Front ends ask it
//! to authenticate a connection and hand back the endpoint of a running
//! backend; the session manager owns the sessions, launches and stops the
//! backend processes, and reclaims sessions left disconnected for too long.
//!
//! # Architecture
//!
//! ```text
//! freerds-session-manager
//!   ├─> RPC Server (control endpoint, one serve loop per peer)
//!   │     └─> Channel (framer + envelope, requests in order, responses by tag)
//!   ├─> Call Registry (message type -> handler)
//!   ├─> Session Store (Down / Init / Active / Disconnected)
//!   ├─> Connection Store (front-end connection -> session)
//!   ├─> Module Manager (backend descriptors, one child process per session)
//!   ├─> Task Executor (deferred logoff, idle-session monitor)
//!   └─> Authenticator (PAM or none, with lockout)
//! ```
//!
//! # Logon Flow
//!
//! **Front end:** LogonUser → authenticate → reuse or create session →
//! start backend → endpoint returned → front end connects to the backend
//!
//! **Greeter:** failed logon → login-screen backend → AuthenticateUser →
//! user session started → SwitchTo sent to the front end

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Authentication providers
pub mod auth;

/// Call catalogue and dispatch
pub mod calls;

/// Session manager configuration
pub mod config;

/// Shared application state
pub mod context;

/// Daemon run loop and pid file
pub mod daemon;

/// Backend module management
pub mod module;

/// Framed RPC transport
pub mod rpc;

/// Sessions, connections and their lifecycle
pub mod session;

/// Background tasks
pub mod task;

/// Utility functions
pub mod utils;

pub use config::Config;
pub use context::AppContext;
