//! Disconnect, logoff and enumeration

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CallContext, CallError, JsonHandler, MessageType, Result};
use crate::session::SessionSummary;

/// A client connection went away
pub struct DisconnectUserSession;

/// DisconnectUserSession request
#[derive(Debug, Deserialize, Serialize)]
pub struct DisconnectUserSessionRequest {
    /// Front-end connection id
    pub connection_id: u32,
}

/// DisconnectUserSession response
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DisconnectUserSessionResponse {
    /// True when the session was parked as `Disconnected`
    pub disconnected: bool,
}

#[async_trait]
impl JsonHandler for DisconnectUserSession {
    const MESSAGE_TYPE: MessageType = MessageType::DisconnectUserSession;
    type Request = DisconnectUserSessionRequest;
    type Response = DisconnectUserSessionResponse;

    async fn handle(ctx: &CallContext, request: DisconnectUserSessionRequest) -> Result<DisconnectUserSessionResponse> {
        let disconnected = ctx.app.disconnect_connection(request.connection_id).await?;
        Ok(DisconnectUserSessionResponse { disconnected })
    }
}

/// End a session for good
pub struct LogOffUserSession;

/// LogOffUserSession request; one of the two ids is required
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LogOffUserSessionRequest {
    /// Session to end
    #[serde(default)]
    pub session_id: Option<u32>,
    /// Connection whose session to end
    #[serde(default)]
    pub connection_id: Option<u32>,
    /// Only end the session if it is still parked since this instant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_since: Option<DateTime<Utc>>,
}

/// LogOffUserSession response
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LogOffUserSessionResponse {
    /// False when a conditional logoff found the session in use again
    pub logged_off: bool,
}

#[async_trait]
impl JsonHandler for LogOffUserSession {
    const MESSAGE_TYPE: MessageType = MessageType::LogOffUserSession;
    type Request = LogOffUserSessionRequest;
    type Response = LogOffUserSessionResponse;

    async fn handle(ctx: &CallContext, request: LogOffUserSessionRequest) -> Result<LogOffUserSessionResponse> {
        let session_id = match (request.session_id, request.connection_id) {
            (Some(session_id), _) => session_id,
            (None, Some(connection_id)) => {
                ctx.app
                    .connections
                    .get(connection_id)
                    .ok_or(CallError::ConnectionNotFound(connection_id))?
                    .session_id
            }
            (None, None) => {
                return Err(CallError::InvalidRequest(
                    "session_id or connection_id required".to_string(),
                ))
            }
        };

        let logged_off = match request.idle_since {
            Some(idle_since) => ctx.app.reclaim_idle_session(session_id, idle_since).await?,
            None => {
                ctx.app.end_session(session_id).await?;
                true
            }
        };
        Ok(LogOffUserSessionResponse { logged_off })
    }
}

/// Snapshot of every session
pub struct EnumerateSessions;

/// EnumerateSessions request (no fields)
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct EnumerateSessionsRequest {}

/// EnumerateSessions response
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EnumerateSessionsResponse {
    /// Sessions ordered by id
    pub sessions: Vec<SessionSummary>,
}

#[async_trait]
impl JsonHandler for EnumerateSessions {
    const MESSAGE_TYPE: MessageType = MessageType::EnumerateSessions;
    type Request = EnumerateSessionsRequest;
    type Response = EnumerateSessionsResponse;

    async fn handle(ctx: &CallContext, _request: EnumerateSessionsRequest) -> Result<EnumerateSessionsResponse> {
        let sessions = ctx
            .app
            .sessions
            .get_all_sessions()
            .iter()
            .map(SessionSummary::from)
            .collect();
        Ok(EnumerateSessionsResponse { sessions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calls::{to_payload, CallRegistry};
    use crate::rpc::{CallEnvelope, CallStatus};
    use crate::session::ConnectState;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_enumerate_returns_snapshot() {
        let app = crate::context::test_context();
        app.sessions.create_session("alice", "corp", "X11");
        app.sessions.create_session("bob", "", "X11");

        let ctx = CallContext::internal(app);
        let registry = CallRegistry::register_all();
        let request = CallEnvelope::request(1, MessageType::EnumerateSessions.as_u32(), Bytes::new());
        let response = registry.dispatch(&request, &ctx).await;

        assert_eq!(response.status, CallStatus::Success);
        let body: EnumerateSessionsResponse = serde_json::from_slice(&response.payload).unwrap();
        assert_eq!(body.sessions.len(), 2);
        assert_eq!(body.sessions[0].username, "alice");
        assert_eq!(body.sessions[1].connect_state, ConnectState::Down);
    }

    #[tokio::test]
    async fn test_logoff_requires_an_id() {
        let ctx = CallContext::internal(crate::context::test_context());
        let registry = CallRegistry::register_all();

        let payload = to_payload(&LogOffUserSessionRequest::default()).unwrap();
        let request = CallEnvelope::request(1, MessageType::LogOffUserSession.as_u32(), payload);
        let response = registry.dispatch(&request, &ctx).await;
        assert_eq!(response.status, CallStatus::Failed);
    }

    #[tokio::test]
    async fn test_logoff_removes_session() {
        let app = crate::context::test_context();
        let session = app.sessions.create_session("alice", "corp", "X11");
        let ctx = CallContext::internal(app.clone());
        let registry = CallRegistry::register_all();

        let payload = to_payload(&LogOffUserSessionRequest {
            session_id: Some(session.session_id),
            ..Default::default()
        })
        .unwrap();
        let request = CallEnvelope::request(1, MessageType::LogOffUserSession.as_u32(), payload.clone());
        let response = registry.dispatch(&request, &ctx).await;
        assert_eq!(response.status, CallStatus::Success);
        assert!(app.sessions.get_session(session.session_id).is_none());

        // second logoff of the same id fails cleanly
        let request = CallEnvelope::request(2, MessageType::LogOffUserSession.as_u32(), payload);
        let response = registry.dispatch(&request, &ctx).await;
        assert_eq!(response.status, CallStatus::Failed);
    }

    #[tokio::test]
    async fn test_idle_logoff_skips_reconnected_session() {
        let app = crate::context::test_context();
        let id = app.sessions.create_session("alice", "corp", "X11").session_id;
        app.sessions.transition(id, ConnectState::Init).unwrap();
        app.sessions.transition(id, ConnectState::Active).unwrap();
        let parked = app.sessions.transition(id, ConnectState::Disconnected).unwrap();
        // user came back before the reclaim ran
        app.sessions.transition(id, ConnectState::Active).unwrap();

        let ctx = CallContext::internal(app.clone());
        let registry = CallRegistry::register_all();
        let payload = to_payload(&LogOffUserSessionRequest {
            session_id: Some(id),
            idle_since: Some(parked.state_changed_at),
            ..Default::default()
        })
        .unwrap();
        let request = CallEnvelope::request(1, MessageType::LogOffUserSession.as_u32(), payload);
        let response = registry.dispatch(&request, &ctx).await;

        assert_eq!(response.status, CallStatus::Success);
        let body: LogOffUserSessionResponse = serde_json::from_slice(&response.payload).unwrap();
        assert!(!body.logged_off);
        assert_eq!(app.sessions.get_session(id).unwrap().connect_state, ConnectState::Active);
    }

    #[tokio::test]
    async fn test_disconnect_unknown_connection_fails() {
        let ctx = CallContext::internal(crate::context::test_context());
        let registry = CallRegistry::register_all();

        let payload = to_payload(&DisconnectUserSessionRequest { connection_id: 77 }).unwrap();
        let request = CallEnvelope::request(1, MessageType::DisconnectUserSession.as_u32(), payload);
        let response = registry.dispatch(&request, &ctx).await;
        assert_eq!(response.status, CallStatus::Failed);
        assert!(response.error_description.unwrap().contains("77"));
    }
}
