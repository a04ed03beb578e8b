//! Utility Functions and Diagnostics
//!
//! - [`diagnostics`] - host information logged at startup
//! - [`errors`] - startup failures formatted with troubleshooting hints
//!
//! ```rust,no_run
//! use freerds_session_manager::utils::format_user_error;
//!
//! fn start() -> anyhow::Result<()> {
//!     anyhow::bail!("Failed to bind control endpoint /var/run/freerds/FreeRDS_SessionManager")
//! }
//!
//! if let Err(e) = start() {
//!     eprintln!("{}", format_user_error(&e));
//! }
//! ```

pub mod diagnostics;
pub mod errors;

pub use diagnostics::{log_startup_diagnostics, SystemInfo};
pub use errors::format_user_error;
