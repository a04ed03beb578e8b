//! Application context
//!
//! One [`AppContext`] is built at startup and shared as `Arc<AppContext>` by
//! the control server, every call handler and the task executor. It owns all
//! registries; there is no global state.
//!
//! ```text
//! AppContext
//!   ├─> config / properties     (read-only, per-session overrides)
//!   ├─> sessions / connections  (store-wide locks)
//!   ├─> modules                 (registry + running backends)
//!   ├─> peers / calls           (control connections, dispatch table)
//!   ├─> executor                (deferred work, timeout monitor)
//!   └─> authenticator
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{create_authenticator, Authenticator};
use crate::calls::CallRegistry;
use crate::config::{Config, PropertyStore};
use crate::module::{ModuleManager, ModuleStatus};
use crate::rpc::PeerRegistry;
use crate::session::{ConnectState, ConnectionStore, SessionStore};
use crate::task::TaskExecutor;

/// Shared state of a running session manager
pub struct AppContext {
    /// Loaded configuration
    pub config: Config,
    /// Module and session properties
    pub properties: PropertyStore,
    /// All sessions
    pub sessions: SessionStore,
    /// Client connection to session mapping
    pub connections: ConnectionStore,
    /// Backend modules
    pub modules: ModuleManager,
    /// Connected control peers
    pub peers: PeerRegistry,
    /// Inbound dispatch table
    pub calls: CallRegistry,
    /// Deferred work
    pub executor: TaskExecutor,
    /// Credential check
    pub authenticator: Arc<dyn Authenticator>,
    shutdown: CancellationToken,
}

impl AppContext {
    /// Assemble a context from prepared parts
    pub fn new(config: Config, modules: ModuleManager, authenticator: Arc<dyn Authenticator>) -> Arc<Self> {
        let properties = config.property_store();
        let executor = TaskExecutor::new(config.server.monitor_interval());

        Arc::new(Self {
            properties,
            sessions: SessionStore::new(),
            connections: ConnectionStore::new(),
            modules,
            peers: PeerRegistry::new(),
            calls: CallRegistry::register_all(),
            executor,
            authenticator,
            shutdown: CancellationToken::new(),
            config,
        })
    }

    /// Discover modules and create the authenticator described by `config`
    pub fn from_config(config: Config) -> Result<Arc<Self>> {
        let mut modules = ModuleManager::from_config(&config);

        let directory = &config.modules.directory;
        if directory.is_dir() {
            modules
                .load_modules_from_path(directory, &config.modules.pattern)
                .with_context(|| format!("Failed to load modules from {}", directory.display()))?;
        } else {
            warn!("Module directory {} does not exist", directory.display());
        }

        if modules.descriptor(&config.modules.default_module).is_none() {
            warn!(
                "Default module {} is not registered; logons will fail",
                config.modules.default_module
            );
        }
        if let Some(greeter) = &config.modules.greeter_module {
            if modules.descriptor(greeter).is_none() {
                warn!("Greeter module {} is not registered", greeter);
            }
        }

        let authenticator = create_authenticator(&config.auth).context("Failed to create authenticator")?;

        Ok(Self::new(config, modules, authenticator))
    }

    /// Start the task executor and the module status listener
    pub fn start_background(self: &Arc<Self>) -> Result<()> {
        self.executor
            .start(Arc::clone(self))
            .context("Failed to start task executor")?;

        let mut status = self
            .modules
            .take_status_receiver()
            .context("Module status stream already taken")?;

        let ctx = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    report = status.recv() => match report {
                        Some(report) => ctx.on_module_status(&report),
                        None => break,
                    },
                }
            }
            debug!("Module status listener stopped");
        });

        Ok(())
    }

    fn on_module_status(&self, status: &ModuleStatus) {
        let ModuleStatus::Exited { session_id, code, .. } = *status;

        if !self.modules.handle_exit(status) {
            debug!("Ignoring exit report of a replaced backend for session {}", session_id);
            return;
        }

        warn!("Backend of session {} exited on its own (code {:?})", session_id, code);

        let result = self
            .sessions
            .transition(session_id, ConnectState::Down)
            .and_then(|_| self.sessions.update(session_id, |s| s.pipe_endpoint = None));
        if let Err(e) = result {
            debug!("Session {} not updated after backend exit: {}", session_id, e);
        }
    }

    /// Token cancelled when the session manager stops
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop accepting work, close peers and stop every backend
    pub async fn shutdown(&self) {
        info!("Shutting down session manager");
        self.shutdown.cancel();
        self.executor.shutdown().await;

        for channel in self.peers.drain() {
            channel.close().await;
        }

        self.modules.stop_all().await;
        info!("Session manager stopped ({} session(s) discarded)", self.sessions.len());
    }
}

#[cfg(test)]
pub(crate) fn test_context() -> Arc<AppContext> {
    test_context_with(Config::default_config())
}

#[cfg(test)]
pub(crate) fn test_context_with(mut config: Config) -> Arc<AppContext> {
    config.server.pipe_dir = std::env::temp_dir();
    config.auth.provider = "none".to_string();
    let modules = ModuleManager::from_config(&config);
    AppContext::new(config, modules, Arc::new(crate::auth::NoAuthenticator))
}
