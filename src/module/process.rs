//! Child-process backends
//!
//! Every backend kind is launched as a separate OS process. A watcher task
//! owns the child: it reports an unsolicited exit through the status sink, or
//! terminates the child (SIGTERM, then SIGKILL after a grace period) when the
//! context is stopped or freed.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{LaunchSettings, ModuleBackend, ModuleInstance, ModuleStatus, StatusSink};
use super::descriptor::ModuleDescriptor;
use super::error::{ModuleError, Result};

/// How long a backend gets to exit after SIGTERM
const STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Backend launched from a descriptor's command line
pub struct ProcessBackend {
    descriptor: ModuleDescriptor,
}

impl ProcessBackend {
    /// Wrap a descriptor
    pub fn new(descriptor: ModuleDescriptor) -> Self {
        Self { descriptor }
    }
}

impl ModuleBackend for ProcessBackend {
    fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    fn new_context(
        &self,
        session_id: u32,
        instance_id: u64,
        status: StatusSink,
    ) -> Result<Box<dyn ModuleInstance>> {
        Ok(Box::new(ProcessInstance {
            descriptor: self.descriptor.clone(),
            session_id,
            instance_id,
            status,
            process: None,
        }))
    }
}

struct RunningProcess {
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
    exited: watch::Receiver<bool>,
    watcher: JoinHandle<()>,
}

/// Per-session child process
pub struct ProcessInstance {
    descriptor: ModuleDescriptor,
    session_id: u32,
    instance_id: u64,
    status: StatusSink,
    process: Option<RunningProcess>,
}

impl ProcessInstance {
    fn build_command(&self, settings: &LaunchSettings) -> Command {
        let mut cmd = Command::new(&self.descriptor.command);

        cmd.args(self.descriptor.args.iter().map(|arg| settings.expand(arg)))
            .env_clear()
            .envs(&settings.environment)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        // Only root can switch identity; otherwise the backend runs as us
        if let Some(user) = &settings.user {
            if nix::unistd::geteuid().is_root() && user.uid != 0 {
                cmd.uid(user.uid).gid(user.gid);
                if let Some(home) = user.home.to_str() {
                    cmd.current_dir(home);
                }
            }
        }

        cmd
    }
}

#[async_trait]
impl ModuleInstance for ProcessInstance {
    async fn start(&mut self, settings: &LaunchSettings) -> Result<()> {
        if self.process.is_some() {
            return Err(ModuleError::StartFailed {
                session_id: self.session_id,
                reason: "backend already started".to_string(),
            });
        }

        let child = self
            .build_command(settings)
            .spawn()
            .map_err(|e| ModuleError::StartFailed {
                session_id: self.session_id,
                reason: format!("failed to spawn {}: {}", self.descriptor.command.display(), e),
            })?;

        let pid = child.id();
        info!(
            "Spawned {} backend for session {} (PID: {:?})",
            self.descriptor.name, self.session_id, pid
        );

        let (kill_tx, kill_rx) = oneshot::channel();
        let (exited_tx, exited) = watch::channel(false);
        let watcher = tokio::spawn(watch_child(
            child,
            kill_rx,
            exited_tx,
            self.status.clone(),
            self.session_id,
            self.instance_id,
        ));

        self.process = Some(RunningProcess {
            pid,
            kill_tx: Some(kill_tx),
            exited,
            watcher,
        });

        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(mut process) = self.process.take() else {
            return Ok(());
        };

        debug!(
            "Stopping backend for session {} (PID: {:?})",
            self.session_id, process.pid
        );

        if let Some(kill_tx) = process.kill_tx.take() {
            let _ = kill_tx.send(());
        }

        process.watcher.await.map_err(|e| ModuleError::StopFailed {
            session_id: self.session_id,
            reason: format!("watcher task failed: {}", e),
        })
    }

    fn is_running(&self) -> bool {
        self.process
            .as_ref()
            .is_some_and(|process| !*process.exited.borrow())
    }
}

async fn watch_child(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    exited: watch::Sender<bool>,
    status: StatusSink,
    session_id: u32,
    instance_id: u64,
) {
    tokio::select! {
        result = child.wait() => {
            let code = result.ok().and_then(|s| s.code());
            warn!("Backend for session {} exited on its own (code {:?})", session_id, code);
            let _ = exited.send(true);
            let _ = status.send(ModuleStatus::Exited {
                session_id,
                instance_id,
                code,
            });
        }
        // a dropped sender (context freed) also lands here
        _ = kill_rx => {
            terminate_child(&mut child, session_id).await;
            let _ = exited.send(true);
        }
    }
}

async fn terminate_child(child: &mut Child, session_id: u32) {
    if let Some(pid) = child.id() {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            debug!("SIGTERM to backend {} failed: {}", pid, e);
        }

        match tokio::time::timeout(STOP_GRACE_PERIOD, child.wait()).await {
            Ok(Ok(status)) => {
                debug!("Backend for session {} exited with status: {}", session_id, status);
                return;
            }
            Ok(Err(e)) => warn!("Error waiting for backend of session {}: {}", session_id, e),
            Err(_) => warn!(
                "Backend for session {} did not exit within {:?}, killing",
                session_id, STOP_GRACE_PERIOD
            ),
        }
    }

    if let Err(e) = child.kill().await {
        debug!("Kill of backend for session {} failed: {}", session_id, e);
    }
}
