//! Module lifecycle management
//!
//! The manager owns the registry of backend plugins (filled before the
//! manager is shared, read-only afterwards) and the map of running per-session
//! contexts. `start_module` runs New, resolution negotiation, environment
//! assembly and Start, then waits until the backend endpoint accepts a
//! connection. Any failure along the way tears the context down again.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::backend::{LaunchSettings, ModuleBackend, ModuleInstance, ModuleStatus, StatusSink};
use super::descriptor::{BackendKind, ModuleDescriptor};
use super::error::{ModuleError, Result};
use super::process::ProcessBackend;
use super::resolution::{negotiate_color_depth, negotiate_resolution, ResolutionBounds};
use crate::config::{Config, ConfigAccessor};
use crate::session::{ClientSettings, Session};

/// Poll interval while waiting for a backend endpoint
const ENDPOINT_POLL_INTERVAL: Duration = Duration::from_millis(100);

const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Deterministic backend endpoint: `<pipe_dir>/FreeRDS_<session_id>_<tag>`
pub fn endpoint_path(pipe_dir: &Path, session_id: u32, tag: &str) -> PathBuf {
    pipe_dir.join(format!("FreeRDS_{}_{}", session_id, tag))
}

/// Result of a successful start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedModule {
    /// Backend endpoint, ready for connections
    pub endpoint: PathBuf,
    /// Effective width
    pub width: u32,
    /// Effective height
    pub height: u32,
    /// Effective colour depth
    pub color_depth: u32,
    /// Context instance, used to ignore stale exit reports
    pub instance_id: u64,
}

struct RunningModule {
    instance_id: u64,
    module_name: String,
    endpoint: PathBuf,
    instance: Box<dyn ModuleInstance>,
}

/// Registry of backend plugins and running contexts
pub struct ModuleManager {
    backends: HashMap<String, Arc<dyn ModuleBackend>>,
    running: Mutex<HashMap<u32, RunningModule>>,
    status_tx: StatusSink,
    status_rx: Mutex<Option<mpsc::UnboundedReceiver<ModuleStatus>>>,
    pipe_dir: PathBuf,
    connect_timeout: Duration,
    next_instance: AtomicU64,
}

impl ModuleManager {
    /// Create an empty manager
    pub fn new(pipe_dir: impl Into<PathBuf>, connect_timeout: Duration) -> Self {
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        Self {
            backends: HashMap::new(),
            running: Mutex::new(HashMap::new()),
            status_tx,
            status_rx: Mutex::new(Some(status_rx)),
            pipe_dir: pipe_dir.into(),
            connect_timeout,
            next_instance: AtomicU64::new(1),
        }
    }

    /// Create a manager with the pipe directory and timeout from config
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.server.pipe_dir.clone(), config.modules.connect_timeout())
    }

    /// Register a backend under its (upper-cased) descriptor name
    pub fn register(&mut self, backend: Arc<dyn ModuleBackend>) -> Result<()> {
        let name = backend.descriptor().name.to_ascii_uppercase();
        if self.backends.contains_key(&name) {
            return Err(ModuleError::DuplicateModule(name));
        }
        info!(
            "Registered module {} ({:?})",
            name,
            backend.descriptor().kind
        );
        self.backends.insert(name, backend);
        Ok(())
    }

    /// Register every descriptor in `dir` whose file name matches `pattern`.
    ///
    /// A descriptor that fails to load is logged and skipped. Returns the
    /// number of modules registered.
    pub fn load_modules_from_path(&mut self, dir: &Path, pattern: &str) -> Result<usize> {
        let full_pattern = dir.join(pattern);
        let full_pattern = full_pattern.to_string_lossy();
        let entries = glob::glob(&full_pattern).map_err(|e| ModuleError::InvalidPattern(e.to_string()))?;

        let mut loaded = 0;
        for entry in entries {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    warn!("Skipping unreadable module path: {}", e);
                    continue;
                }
            };

            let descriptor = match ModuleDescriptor::from_file(&path) {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    warn!("Skipping module descriptor {}: {}", path.display(), e);
                    continue;
                }
            };

            match self.register(Arc::new(ProcessBackend::new(descriptor))) {
                Ok(()) => loaded += 1,
                Err(e) => warn!("Skipping module descriptor {}: {}", path.display(), e),
            }
        }

        info!("Loaded {} module(s) from {}", loaded, dir.display());
        Ok(loaded)
    }

    /// Registered module names, sorted
    pub fn module_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Descriptor of a registered module
    pub fn descriptor(&self, name: &str) -> Option<&ModuleDescriptor> {
        self.backends
            .get(&name.to_ascii_uppercase())
            .map(|backend| backend.descriptor())
    }

    /// Take the status stream; only the first caller gets it
    pub fn take_status_receiver(&self) -> Option<mpsc::UnboundedReceiver<ModuleStatus>> {
        self.status_rx.lock().take()
    }

    /// Start the backend for a session and wait for its endpoint
    pub async fn start_module(&self, session: &Session, config: &dyn ConfigAccessor) -> Result<StartedModule> {
        let session_id = session.session_id;
        let name = session.module_name.to_ascii_uppercase();
        let backend = self
            .backends
            .get(&name)
            .cloned()
            .ok_or_else(|| ModuleError::UnknownModule(session.module_name.clone()))?;

        // A leftover context for this session would leak its child
        if let Err(e) = self.stop_module(session_id).await {
            warn!("Failed to stop previous backend for session {}: {}", session_id, e);
        }

        let instance_id = self.next_instance.fetch_add(1, Ordering::Relaxed);
        let mut instance = backend.new_context(session_id, instance_id, self.status_tx.clone())?;

        let requested = session.client_settings.map(|c| (c.width, c.height));
        let bounds = ResolutionBounds::for_module(config, session_id, &name);
        let (width, height) = negotiate_resolution(requested, &bounds);
        let color_depth = negotiate_color_depth(
            config,
            session_id,
            &name,
            session.client_settings.map(|c| c.color_depth),
        );

        let descriptor = backend.descriptor();
        let endpoint = endpoint_path(&self.pipe_dir, session_id, descriptor.endpoint_tag());
        remove_stale_endpoint(&endpoint);

        let effective = ClientSettings {
            width,
            height,
            color_depth,
        };
        let settings = LaunchSettings {
            session_id,
            module_name: name.clone(),
            environment: build_environment(session, descriptor, &endpoint, &effective, &bounds),
            endpoint: endpoint.clone(),
            width,
            height,
            color_depth,
            user: session.user_token.clone(),
        };

        info!(
            "Starting module {} for session {} ({}x{}x{})",
            name, session_id, width, height, color_depth
        );

        if let Err(e) = instance.start(&settings).await {
            error!("Module {} failed to start for session {}: {}", name, session_id, e);
            instance.free();
            return Err(e);
        }

        if let Err(e) = wait_for_endpoint(&endpoint, instance.as_ref(), self.connect_timeout, session_id).await {
            error!("{}", e);
            if let Err(stop_err) = instance.stop().await {
                warn!("Cleanup after failed start of session {}: {}", session_id, stop_err);
            }
            instance.free();
            remove_stale_endpoint(&endpoint);
            return Err(e);
        }

        info!("Module {} ready for session {} at {}", name, session_id, endpoint.display());

        self.running.lock().insert(
            session_id,
            RunningModule {
                instance_id,
                module_name: name,
                endpoint: endpoint.clone(),
                instance,
            },
        );

        Ok(StartedModule {
            endpoint,
            width,
            height,
            color_depth,
            instance_id,
        })
    }

    /// Stop then free the backend of a session; no-op when none is running
    pub async fn stop_module(&self, session_id: u32) -> Result<()> {
        let Some(mut running) = self.running.lock().remove(&session_id) else {
            return Ok(());
        };

        info!("Stopping module {} for session {}", running.module_name, session_id);
        let result = running.instance.stop().await;
        running.instance.free();
        remove_stale_endpoint(&running.endpoint);
        result
    }

    /// Whether the session's backend is alive
    pub fn is_running(&self, session_id: u32) -> bool {
        self.running
            .lock()
            .get(&session_id)
            .is_some_and(|running| running.instance.is_running())
    }

    /// Number of running contexts
    pub fn running_count(&self) -> usize {
        self.running.lock().len()
    }

    /// Forget a context whose backend exited on its own.
    ///
    /// Returns false for reports about an instance that is no longer current.
    pub fn handle_exit(&self, status: &ModuleStatus) -> bool {
        let ModuleStatus::Exited {
            session_id,
            instance_id,
            ..
        } = *status;

        let mut running = self.running.lock();
        match running.get(&session_id) {
            Some(current) if current.instance_id == instance_id => {
                if let Some(stale) = running.remove(&session_id) {
                    remove_stale_endpoint(&stale.endpoint);
                    stale.instance.free();
                }
                true
            }
            _ => false,
        }
    }

    /// Stop every running backend
    pub async fn stop_all(&self) {
        let session_ids: Vec<u32> = self.running.lock().keys().copied().collect();
        for session_id in session_ids {
            if let Err(e) = self.stop_module(session_id).await {
                warn!("Failed to stop module for session {}: {}", session_id, e);
            }
        }
    }
}

fn remove_stale_endpoint(endpoint: &Path) {
    match std::fs::remove_file(endpoint) {
        Ok(()) => debug!("Removed endpoint {}", endpoint.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove endpoint {}: {}", endpoint.display(), e),
    }
}

/// Environment block for a backend process.
///
/// Carries the session identity, the negotiated display settings and the
/// module's resolution bounds.
pub fn build_environment(
    session: &Session,
    descriptor: &ModuleDescriptor,
    endpoint: &Path,
    effective: &ClientSettings,
    bounds: &ResolutionBounds,
) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();

    env.insert(
        "PATH".to_string(),
        std::env::var("PATH").unwrap_or_else(|_| DEFAULT_PATH.to_string()),
    );
    env.insert("FREERDS_SESSION_ID".to_string(), session.session_id.to_string());
    env.insert("FREERDS_PIPE_ENDPOINT".to_string(), endpoint.to_string_lossy().into_owned());
    env.insert("FREERDS_MODULE".to_string(), descriptor.name.clone());
    env.insert("USER".to_string(), session.username.clone());
    env.insert("LOGNAME".to_string(), session.username.clone());
    env.insert("FREERDS_DOMAIN".to_string(), session.domain.clone());

    for (key, value) in [
        ("FREERDS_XRES", effective.width),
        ("FREERDS_YRES", effective.height),
        ("FREERDS_BPP", effective.color_depth),
        ("FREERDS_MIN_XRES", bounds.min_width),
        ("FREERDS_MIN_YRES", bounds.min_height),
        ("FREERDS_MAX_XRES", bounds.max_width),
        ("FREERDS_MAX_YRES", bounds.max_height),
    ] {
        env.insert(key.to_string(), value.to_string());
    }

    if let Some(token) = &session.user_token {
        env.insert("HOME".to_string(), token.home.to_string_lossy().into_owned());
        env.insert("SHELL".to_string(), token.shell.to_string_lossy().into_owned());
    }

    if descriptor.kind == BackendKind::X11 {
        env.insert(
            "DISPLAY".to_string(),
            format!(":{}", super::backend::DISPLAY_OFFSET + session.session_id),
        );
    }

    for (key, value) in &descriptor.env {
        env.insert(key.clone(), value.clone());
    }
    for (key, value) in &session.environment {
        env.insert(key.clone(), value.clone());
    }

    env
}

async fn wait_for_endpoint(
    endpoint: &Path,
    instance: &dyn ModuleInstance,
    timeout: Duration,
    session_id: u32,
) -> Result<()> {
    let deadline = Instant::now() + timeout;

    loop {
        if UnixStream::connect(endpoint).await.is_ok() {
            return Ok(());
        }

        if !instance.is_running() {
            return Err(ModuleError::StartFailed {
                session_id,
                reason: "backend exited before its endpoint became ready".to_string(),
            });
        }

        if Instant::now() >= deadline {
            return Err(ModuleError::StartFailed {
                session_id,
                reason: format!(
                    "endpoint {} not ready after {}ms",
                    endpoint.display(),
                    timeout.as_millis()
                ),
            });
        }

        tokio::time::sleep(ENDPOINT_POLL_INTERVAL).await;
    }
}
