//! Background work
//!
//! A single worker runs queued [`Task`]s one at a time in submission order
//! and, between tasks, reclaims disconnected sessions that stayed idle past
//! their timeout.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::context::AppContext;

pub mod end_session;
pub mod executor;
pub mod timeout;

pub use end_session::EndSessionTask;
pub use executor::TaskExecutor;
pub use timeout::{expired_sessions, IdleSession, DEFAULT_SESSION_TIMEOUT_MINUTES, MONITOR_INTERVAL, SESSION_TIMEOUT_KEY};

/// A unit of deferred work
#[async_trait]
pub trait Task: Send + 'static {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Run to completion
    async fn run(self: Box<Self>, ctx: &Arc<AppContext>);
}

/// Owned, type-erased task
pub type BoxedTask = Box<dyn Task>;

/// Executor errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskError {
    /// The executor has been shut down
    #[error("Task executor is stopped")]
    Stopped,

    /// `start` was called twice
    #[error("Task executor already started")]
    AlreadyStarted,
}
