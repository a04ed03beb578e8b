//! Single-worker task executor with the session-timeout monitor
//!
//! ```text
//! submit() ──> unbounded FIFO ──┐
//!                               ├──> worker (select: cancel > queue > tick)
//! interval tick ────────────────┘         │
//!                                         └─ tick: expired_sessions() ──> submit(EndSessionTask)
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::end_session::EndSessionTask;
use super::timeout::expired_sessions;
use super::{BoxedTask, TaskError};
use crate::context::AppContext;

/// Runs queued tasks one at a time
pub struct TaskExecutor {
    queue: mpsc::UnboundedSender<BoxedTask>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<BoxedTask>>>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    monitor_interval: Duration,
}

impl TaskExecutor {
    /// Create a stopped executor; tasks submitted before `start` wait in the queue
    pub fn new(monitor_interval: Duration) -> Self {
        let (queue, receiver) = mpsc::unbounded_channel();
        Self {
            queue,
            receiver: Mutex::new(Some(receiver)),
            cancel: CancellationToken::new(),
            worker: Mutex::new(None),
            monitor_interval,
        }
    }

    /// Queue a task
    pub fn submit(&self, task: BoxedTask) -> Result<(), TaskError> {
        if self.cancel.is_cancelled() {
            return Err(TaskError::Stopped);
        }
        debug!("Queued task {}", task.name());
        self.queue.send(task).map_err(|_| TaskError::Stopped)
    }

    /// Spawn the worker
    pub fn start(&self, ctx: Arc<AppContext>) -> Result<(), TaskError> {
        let receiver = self.receiver.lock().take().ok_or(TaskError::AlreadyStarted)?;

        let handle = tokio::spawn(worker_loop(
            ctx,
            receiver,
            self.cancel.clone(),
            self.monitor_interval,
        ));
        *self.worker.lock() = Some(handle);

        info!(
            "Task executor started (session monitor every {}s)",
            self.monitor_interval.as_secs_f32()
        );
        Ok(())
    }

    /// Stop accepting work and wait for the current task to finish
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Task executor worker failed: {}", e);
            }
            info!("Task executor stopped");
        }
    }

    /// Whether `shutdown` has been called
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

async fn worker_loop(
    ctx: Arc<AppContext>,
    mut receiver: mpsc::UnboundedReceiver<BoxedTask>,
    cancel: CancellationToken,
    monitor_interval: Duration,
) {
    let mut ticker = tokio::time::interval(monitor_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            task = receiver.recv() => {
                let Some(task) = task else { break };
                run_task(&ctx, task).await;
            }

            _ = ticker.tick() => check_session_timeouts(&ctx),
        }
    }

    debug!("Task executor worker exiting");
}

async fn run_task(ctx: &Arc<AppContext>, task: BoxedTask) {
    let name = task.name();
    debug!("Running task {}", name);

    // a panicking task must not take the worker down with it
    let ctx = Arc::clone(ctx);
    let handle = tokio::spawn(async move { task.run(&ctx).await });
    if let Err(e) = handle.await {
        error!("Task {} panicked: {}", name, e);
    }
}

fn check_session_timeouts(ctx: &AppContext) {
    let sessions = ctx.sessions.get_all_sessions();
    for idle in expired_sessions(&sessions, Utc::now(), &ctx.properties) {
        info!("Session {} idle past its timeout; ending it", idle.session_id);
        if let Err(e) = ctx.executor.submit(Box::new(EndSessionTask::idle(idle))) {
            warn!("Could not queue end of session {}: {}", idle.session_id, e);
        }
    }
}
