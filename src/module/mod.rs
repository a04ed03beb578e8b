//! Backend module management
//!
//! Backends (X11, RDP passthrough, CEF, NetSurf, custom commands) are
//! described by TOML descriptors discovered in a configured directory and are
//! run as child processes, one per session.
//!
//! # Architecture
//!
//! ```text
//! ModuleManager
//!   ├─> registry: name -> ModuleBackend        (read-only once shared)
//!   ├─> running:  session id -> ModuleInstance (lock never held across .await)
//!   └─> status:   ModuleStatus stream          (unsolicited backend exits)
//! ```

pub mod backend;
pub mod descriptor;
pub mod error;
pub mod manager;
pub mod process;
pub mod resolution;

pub use backend::{LaunchSettings, ModuleBackend, ModuleInstance, ModuleStatus, StatusSink};
pub use descriptor::{BackendKind, ModuleDescriptor, MODULE_API_VERSION};
pub use error::{ModuleError, Result};
pub use manager::{endpoint_path, ModuleManager, StartedModule};
pub use process::ProcessBackend;
pub use resolution::{negotiate_color_depth, negotiate_resolution, ResolutionBounds};
