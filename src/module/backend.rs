//! Backend plugin entry points
//!
//! A backend is registered once under its descriptor name and creates one
//! private context per session:
//!
//! ```text
//! New   ModuleBackend::new_context   allocate per-session state
//! Start ModuleInstance::start        launch the backend, endpoint comes up
//! Stop  ModuleInstance::stop         terminate the backend
//! Free  ModuleInstance::free         release the per-session state
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::descriptor::ModuleDescriptor;
use super::error::Result;
use crate::session::UserToken;

/// X display numbers start above the console displays
pub const DISPLAY_OFFSET: u32 = 10;

/// Everything a backend needs to launch for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSettings {
    /// Session being served
    pub session_id: u32,
    /// Upper-cased module name
    pub module_name: String,
    /// Socket the backend must listen on
    pub endpoint: PathBuf,
    /// Effective width
    pub width: u32,
    /// Effective height
    pub height: u32,
    /// Effective colour depth
    pub color_depth: u32,
    /// Complete environment block for the backend process
    pub environment: BTreeMap<String, String>,
    /// Identity to run as, when known
    pub user: Option<UserToken>,
}

impl LaunchSettings {
    /// X display name derived from the session id
    pub fn display(&self) -> String {
        format!(":{}", DISPLAY_OFFSET + self.session_id)
    }

    /// Substitute launch placeholders in a descriptor argument
    pub fn expand(&self, template: &str) -> String {
        let user = self
            .user
            .as_ref()
            .map(|u| u.username.as_str())
            .unwrap_or_default();

        template
            .replace("{session_id}", &self.session_id.to_string())
            .replace("{endpoint}", &self.endpoint.to_string_lossy())
            .replace("{display}", &self.display())
            .replace("{width}", &self.width.to_string())
            .replace("{height}", &self.height.to_string())
            .replace("{bpp}", &self.color_depth.to_string())
            .replace("{user}", user)
    }
}

/// Status reported by a running backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleStatus {
    /// The backend process ended without being asked to
    Exited {
        /// Session the backend served
        session_id: u32,
        /// Instance that exited
        instance_id: u64,
        /// Exit code, absent when killed by a signal
        code: Option<i32>,
    },
}

/// Status callback handed to every module context
pub type StatusSink = mpsc::UnboundedSender<ModuleStatus>;

/// Registered backend plugin
pub trait ModuleBackend: Send + Sync {
    /// Descriptor the backend was registered from
    fn descriptor(&self) -> &ModuleDescriptor;

    /// New: allocate the private context for one session
    fn new_context(
        &self,
        session_id: u32,
        instance_id: u64,
        status: StatusSink,
    ) -> Result<Box<dyn ModuleInstance>>;
}

/// Per-session backend context
#[async_trait]
pub trait ModuleInstance: Send + Sync {
    /// Launch the backend; returns once it has been spawned
    async fn start(&mut self, settings: &LaunchSettings) -> Result<()>;

    /// Terminate the backend; stopping a stopped context is a no-op
    async fn stop(&mut self) -> Result<()>;

    /// Whether the backend is still alive
    fn is_running(&self) -> bool;

    /// Release the context
    fn free(self: Box<Self>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> LaunchSettings {
        LaunchSettings {
            session_id: 3,
            module_name: "X11".to_string(),
            endpoint: PathBuf::from("/run/freerds/FreeRDS_3_X11"),
            width: 1280,
            height: 800,
            color_depth: 24,
            environment: BTreeMap::new(),
            user: None,
        }
    }

    #[test]
    fn test_display_derived_from_session() {
        assert_eq!(settings().display(), ":13");
    }

    #[test]
    fn test_placeholder_expansion() {
        let s = settings();
        assert_eq!(s.expand("{width}x{height}"), "1280x800");
        assert_eq!(s.expand("--depth={bpp}"), "--depth=24");
        assert_eq!(s.expand("{endpoint}"), "/run/freerds/FreeRDS_3_X11");
        assert_eq!(s.expand("{display}/{session_id}"), ":13/3");
        assert_eq!(s.expand("user={user}"), "user=");
    }
}
