//! Deferred logoff

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::timeout::IdleSession;
use super::Task;
use crate::calls::session::LogOffUserSessionRequest;
use crate::calls::{to_payload, CallContext, MessageType};
use crate::context::AppContext;
use crate::rpc::{CallEnvelope, CallStatus};

/// Ends a session through the regular LogOffUserSession call path
#[derive(Debug, Clone, Copy)]
pub struct EndSessionTask {
    session_id: u32,
    idle_since: Option<DateTime<Utc>>,
}

impl EndSessionTask {
    /// Task ending `session_id` unconditionally
    pub fn new(session_id: u32) -> Self {
        Self {
            session_id,
            idle_since: None,
        }
    }

    /// Task reclaiming a parked session, unless it moved on since the snapshot
    pub fn idle(idle: IdleSession) -> Self {
        Self {
            session_id: idle.session_id,
            idle_since: Some(idle.idle_since),
        }
    }

    /// Target session
    pub fn session_id(&self) -> u32 {
        self.session_id
    }
}

#[async_trait]
impl Task for EndSessionTask {
    fn name(&self) -> &'static str {
        "EndSession"
    }

    async fn run(self: Box<Self>, ctx: &Arc<AppContext>) {
        let request = LogOffUserSessionRequest {
            session_id: Some(self.session_id),
            connection_id: None,
            idle_since: self.idle_since,
        };
        let payload = match to_payload(&request) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Cannot encode logoff of session {}: {}", self.session_id, e);
                return;
            }
        };

        let envelope = CallEnvelope::request(0, MessageType::LogOffUserSession.as_u32(), payload);
        let response = ctx
            .calls
            .dispatch(&envelope, &CallContext::internal(Arc::clone(ctx)))
            .await;

        match response.status {
            CallStatus::Success => debug!("Logoff of session {} done", self.session_id),
            status => warn!(
                "Ending session {} failed ({}): {}",
                self.session_id,
                status,
                response.error_description.unwrap_or_default()
            ),
        }
    }
}
