//! Shared helpers for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::UnixListener;
use tokio::task::JoinHandle;

use freerds_session_manager::auth::NoAuthenticator;
use freerds_session_manager::config::Config;
use freerds_session_manager::module::{
    BackendKind, LaunchSettings, ModuleBackend, ModuleDescriptor, ModuleError, ModuleInstance, ModuleManager,
    ModuleStatus, StatusSink,
};
use freerds_session_manager::AppContext;

/// Config rooted in a scratch directory with short timeouts
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default_config();
    config.server.pipe_dir = dir.to_path_buf();
    config.server.pid_file = dir.join("session-manager.pid");
    config.server.call_timeout_ms = 500;
    config.server.monitor_interval_ms = 50;
    config.modules.directory = dir.join("modules");
    config.modules.connect_timeout_ms = 2000;
    config.auth.provider = "none".to_string();
    config
}

/// Context with in-process backends registered under `names`
pub fn context_with_backends(config: Config, names: &[&str]) -> (Arc<AppContext>, Vec<Arc<SocketBackend>>) {
    let mut modules = ModuleManager::from_config(&config);
    let mut backends = Vec::new();
    for name in names {
        let backend = Arc::new(SocketBackend::new(name));
        modules.register(backend.clone()).unwrap();
        backends.push(backend);
    }
    (AppContext::new(config, modules, Arc::new(NoAuthenticator)), backends)
}

/// Context with already constructed backends
pub fn context_with(config: Config, backends: &[Arc<SocketBackend>]) -> Arc<AppContext> {
    let mut modules = ModuleManager::from_config(&config);
    for backend in backends {
        modules.register(backend.clone()).unwrap();
    }
    AppContext::new(config, modules, Arc::new(NoAuthenticator))
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

struct Live {
    instance_id: u64,
    status: StatusSink,
    listener: tokio::task::AbortHandle,
}

/// Backend that listens on its endpoint inside the test process
pub struct SocketBackend {
    descriptor: ModuleDescriptor,
    starts: Arc<AtomicUsize>,
    live: Arc<Mutex<HashMap<u32, Live>>>,
    stall: bool,
}

impl SocketBackend {
    pub fn new(name: &str) -> Self {
        Self {
            descriptor: ModuleDescriptor::new(name, BackendKind::Command, "/bin/true"),
            starts: Arc::new(AtomicUsize::new(0)),
            live: Arc::new(Mutex::new(HashMap::new())),
            stall: false,
        }
    }

    /// Backend that accepts connections but never answers on them
    pub fn stalling(name: &str) -> Self {
        Self {
            stall: true,
            ..Self::new(name)
        }
    }

    /// Number of successful starts
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Simulate the backend of a session dying on its own
    pub fn crash(&self, session_id: u32) {
        if let Some(live) = self.live.lock().remove(&session_id) {
            live.listener.abort();
            let _ = live.status.send(ModuleStatus::Exited {
                session_id,
                instance_id: live.instance_id,
                code: Some(1),
            });
        }
    }
}

impl ModuleBackend for SocketBackend {
    fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    fn new_context(
        &self,
        session_id: u32,
        instance_id: u64,
        status: StatusSink,
    ) -> freerds_session_manager::module::Result<Box<dyn ModuleInstance>> {
        Ok(Box::new(SocketInstance {
            session_id,
            instance_id,
            status,
            starts: Arc::clone(&self.starts),
            live: Arc::clone(&self.live),
            stall: self.stall,
            task: None,
            endpoint: None,
        }))
    }
}

struct SocketInstance {
    session_id: u32,
    instance_id: u64,
    status: StatusSink,
    starts: Arc<AtomicUsize>,
    live: Arc<Mutex<HashMap<u32, Live>>>,
    stall: bool,
    task: Option<JoinHandle<()>>,
    endpoint: Option<PathBuf>,
}

#[async_trait]
impl ModuleInstance for SocketInstance {
    async fn start(&mut self, settings: &LaunchSettings) -> freerds_session_manager::module::Result<()> {
        let listener = UnixListener::bind(&settings.endpoint).map_err(ModuleError::Io)?;
        let stall = self.stall;
        let task = tokio::spawn(async move {
            // accept and drop: enough for readiness checks and logoff notices
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                if stall {
                    held.push(stream);
                }
            }
        });

        self.live.lock().insert(
            self.session_id,
            Live {
                instance_id: self.instance_id,
                status: self.status.clone(),
                listener: task.abort_handle(),
            },
        );
        self.task = Some(task);
        self.endpoint = Some(settings.endpoint.clone());
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&mut self) -> freerds_session_manager::module::Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.live.lock().remove(&self.session_id);
        if let Some(endpoint) = self.endpoint.take() {
            let _ = std::fs::remove_file(endpoint);
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}
