//! Session registry and lifecycle
//!
//! - [`state`] - connect-state machine
//! - [`store`] - concurrent session registry
//! - [`connection`] - client connection to session mapping
//! - [`lifecycle`] - logon, disconnect, logoff and greeter hand-over

pub mod connection;
pub mod error;
pub mod lifecycle;
pub mod state;
pub mod store;
pub mod types;

pub use connection::{Connection, ConnectionStore};
pub use error::SessionError;
pub use state::ConnectState;
pub use store::SessionStore;
pub use types::{ClientSettings, Session, SessionSummary, UserToken};
