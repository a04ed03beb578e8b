//! Session lifecycle orchestration
//!
//! Ties the session store, module manager, connection store and
//! authenticator together:
//!
//! ```text
//! LogonUser ──auth ok──> acquire (Disconnected > Down > new) ──> ensure running ──> bind connection
//!     └──auth failed──> greeter session (if configured) ──────────┘
//!
//! AuthenticateUser (from greeter) ──> acquire user session ──> SwitchTo ──> end greeter
//! DisconnectUserSession / peer gone ──> Active -> Disconnected (greeter sessions end)
//! LogOffUserSession / timeout ──> LogOffNotify backend ──> stop module ──> remove
//! ```
//!
//! Locks are never held across the module start. A logon claims its session
//! (find and transition) in one store call, and teardown first retires the
//! session out of the reuse pool, so no await point ever sees a session that
//! another caller may still hand out.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::{ClientSettings, ConnectState, Session, SessionError, UserToken};
use crate::calls::outbound::{LogOffNotify, SwitchTo};
use crate::calls::{invoke, CallError, Result};
use crate::config::ConfigAccessor;
use crate::context::AppContext;
use crate::rpc::{PeerId, RpcChannel};
use crate::task::EndSessionTask;

/// Property enabling reuse of disconnected sessions
pub const SESSION_RECONNECT_KEY: &str = "session.reconnect";

/// Input of a logon
#[derive(Debug)]
pub struct LogonParams {
    /// Front-end connection id
    pub connection_id: u32,
    /// Login name
    pub username: String,
    /// Domain
    pub domain: String,
    /// Password, wiped on drop
    pub password: Zeroizing<String>,
    /// Requested display settings
    pub client_settings: Option<ClientSettings>,
}

/// Result of a logon
#[derive(Debug, Clone)]
pub struct LogonOutcome {
    /// Connection that was attached
    pub connection_id: u32,
    /// Session in `Active` state
    pub session: Session,
    /// Backend endpoint
    pub endpoint: PathBuf,
}

/// Result of credentials submitted by a greeter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GreeterOutcome {
    /// Credentials rejected; the greeter stays up
    Rejected,
    /// The connection now belongs to this user session
    Switched {
        /// User session id
        session_id: u32,
    },
}

impl AppContext {
    /// Authenticate a connection and return a running session for it
    pub async fn logon_user(&self, params: LogonParams, peer: Option<PeerId>) -> Result<LogonOutcome> {
        let auth = self
            .authenticator
            .logon_user(&params.username, &params.domain, &params.password)
            .await;

        let claimed = match auth {
            Ok(token) => self.acquire_user_session(&params.username, &params.domain, token, params.client_settings),
            Err(e) => match self.config.modules.greeter_module.as_deref() {
                Some(greeter) => {
                    info!(
                        "Logon for {} failed ({}); starting {} login screen",
                        params.username, e, greeter
                    );
                    let session = self
                        .sessions
                        .create_session(&params.username, &params.domain, greeter);
                    self.sessions.update(session.session_id, |s| {
                        s.client_settings = params.client_settings;
                    })?;
                    self.sessions.transition(session.session_id, ConnectState::Init)?
                }
                None => return Err(CallError::AuthenticationFailed(e)),
            },
        };

        let session = self.into_running(claimed).await?;
        let endpoint = session
            .pipe_endpoint
            .clone()
            .ok_or_else(|| CallError::Failed(format!("session {} has no endpoint", session.session_id)))?;

        match peer {
            Some(peer) => {
                if let Some(previous) = self
                    .connections
                    .bind(params.connection_id, session.session_id, peer)
                {
                    debug!(
                        "Connection {} moved from session {}",
                        params.connection_id, previous.session_id
                    );
                }
            }
            None => debug!("Internal logon for session {}; no connection bound", session.session_id),
        }

        Ok(LogonOutcome {
            connection_id: params.connection_id,
            session,
            endpoint,
        })
    }

    /// Claim the session an authenticated user lands on.
    ///
    /// A `Disconnected` session is preferred (unless reconnection is switched
    /// off), then an authenticated `Down` one, else a new session is created.
    /// The claim is atomic: the session comes back `Active` (reconnected to a
    /// live backend) or `Init` (backend to be started by the caller), so
    /// concurrent logons never share it.
    pub fn acquire_user_session(
        &self,
        username: &str,
        domain: &str,
        token: UserToken,
        client_settings: Option<ClientSettings>,
    ) -> Session {
        let reconnect = self
            .properties
            .get_bool(0, SESSION_RECONNECT_KEY)
            .unwrap_or(true);

        self.sessions.claim_user_session(
            username,
            domain,
            &self.config.modules.default_module,
            reconnect,
            |session_id| self.modules.is_running(session_id),
            |s| {
                s.authenticated = true;
                s.user_token = Some(token);
                if client_settings.is_some() {
                    s.client_settings = client_settings;
                }
            },
        )
    }

    async fn into_running(&self, claimed: Session) -> Result<Session> {
        if claimed.connect_state == ConnectState::Active {
            info!("Reconnected session {}", claimed.session_id);
            return Ok(claimed);
        }
        self.ensure_session_running(claimed).await
    }

    /// Start the backend of a claimed `Init` session and bring it to `Active`
    pub async fn ensure_session_running(&self, session: Session) -> Result<Session> {
        let session_id = session.session_id;
        if session.connect_state != ConnectState::Init {
            return Err(CallError::Failed(format!(
                "session {} is {}, not claimed for start",
                session_id, session.connect_state
            )));
        }

        let started = match self.modules.start_module(&session, &self.properties).await {
            Ok(started) => started,
            Err(e) => {
                if let Err(state_err) = self.sessions.transition(session_id, ConnectState::Down) {
                    debug!("Session {} vanished during start: {}", session_id, state_err);
                }
                return Err(e.into());
            }
        };

        let activated = self
            .sessions
            .update(session_id, |s| {
                s.pipe_endpoint = Some(started.endpoint.clone());
                s.client_settings = Some(ClientSettings {
                    width: started.width,
                    height: started.height,
                    color_depth: started.color_depth,
                });
            })
            .and_then(|_| self.sessions.transition(session_id, ConnectState::Active));

        match activated {
            Ok(session) => Ok(session),
            Err(e) => {
                // logged off while starting
                warn!("Session {} changed during start: {}", session_id, e);
                if let Err(stop_err) = self.modules.stop_module(session_id).await {
                    warn!("Failed to stop backend of session {}: {}", session_id, stop_err);
                }
                Err(e.into())
            }
        }
    }

    /// Detach a client connection from its session.
    ///
    /// Returns true when the session was parked as `Disconnected`.
    pub async fn disconnect_connection(&self, connection_id: u32) -> Result<bool> {
        let connection = self
            .connections
            .remove(connection_id)
            .ok_or(CallError::ConnectionNotFound(connection_id))?;

        self.detach_session(connection.session_id).await
    }

    async fn detach_session(&self, session_id: u32) -> Result<bool> {
        if self.connections.find_by_session(session_id).is_some() {
            debug!("Session {} still has a connection", session_id);
            return Ok(false);
        }

        let Some(session) = self.sessions.get_session(session_id) else {
            return Ok(false);
        };

        if !session.authenticated {
            info!("Login screen session {} lost its connection; ending it", session_id);
            self.end_session(session_id).await?;
            return Ok(false);
        }

        if session.connect_state != ConnectState::Active {
            debug!("Session {} is {}; nothing to disconnect", session_id, session.connect_state);
            return Ok(false);
        }

        self.sessions
            .transition(session_id, ConnectState::Disconnected)?;
        info!("Session {} disconnected", session_id);
        Ok(true)
    }

    /// Notify the backend, stop it and forget the session
    pub async fn end_session(&self, session_id: u32) -> Result<()> {
        let session = self.sessions.retire_session(session_id).map_err(|e| match e {
            SessionError::NotFound(id) => CallError::SessionNotFound(id),
            e => e.into(),
        })?;

        self.teardown(session).await;
        Ok(())
    }

    /// End a session the idle monitor saw parked since `idle_since`.
    ///
    /// Returns false without touching anything when the session was
    /// reconnected, parked again or removed after that snapshot.
    pub async fn reclaim_idle_session(&self, session_id: u32, idle_since: DateTime<Utc>) -> Result<bool> {
        let session = match self.sessions.retire_idle_session(session_id, idle_since) {
            Ok(session) => session,
            Err(e @ (SessionError::Changed(_) | SessionError::NotFound(_))) => {
                debug!("Not reclaiming session {}: {}", session_id, e);
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        info!("Reclaiming idle session {} ({})", session_id, session.qualified_name());
        self.teardown(session).await;
        Ok(true)
    }

    async fn teardown(&self, session: Session) {
        let session_id = session.session_id;

        if let Some(endpoint) = &session.pipe_endpoint {
            if self.modules.is_running(session_id) {
                self.notify_logoff(session_id, endpoint).await;
            }
        }

        if let Err(e) = self.modules.stop_module(session_id).await {
            warn!("Failed to stop backend of session {}: {}", session_id, e);
        }

        for connection in self.connections.remove_session(session_id) {
            debug!("Dropped connection {} of session {}", connection.connection_id, session_id);
        }
        self.properties.clear_session(session_id);
        self.sessions.remove_session(session_id);

        info!("Session {} ({}) logged off", session_id, session.qualified_name());
    }

    async fn notify_logoff(&self, session_id: u32, endpoint: &std::path::Path) {
        let token = CancellationToken::new();
        let parts = match RpcChannel::connect(endpoint, self.config.server.max_message_size, &token).await {
            Ok(parts) => parts,
            Err(e) => {
                debug!("Backend of session {} unreachable for logoff notice: {}", session_id, e);
                return;
            }
        };

        let call = LogOffNotify { session_id };
        if let Err(e) = invoke(&parts.channel, &call, self.config.server.call_timeout()).await {
            debug!("Backend of session {} did not acknowledge logoff: {}", session_id, e);
        }
        parts.channel.close().await;
    }

    /// Accept or reject credentials typed into a login screen
    pub async fn authenticate_greeter(
        &self,
        greeter_id: u32,
        username: &str,
        domain: &str,
        password: &str,
    ) -> Result<GreeterOutcome> {
        let greeter = self
            .sessions
            .get_session(greeter_id)
            .ok_or(CallError::SessionNotFound(greeter_id))?;

        if greeter.authenticated {
            return Err(CallError::Failed(format!(
                "session {} is already authenticated",
                greeter_id
            )));
        }

        let token = match self.authenticator.logon_user(username, domain, password).await {
            Ok(token) => token,
            Err(e) => {
                info!("Login screen session {} rejected credentials: {}", greeter_id, e);
                return Ok(GreeterOutcome::Rejected);
            }
        };

        let target = self.acquire_user_session(username, domain, token, greeter.client_settings);
        let target = self.into_running(target).await?;
        let endpoint = target
            .pipe_endpoint
            .clone()
            .ok_or_else(|| CallError::Failed(format!("session {} has no endpoint", target.session_id)))?;

        if let Some(connection) = self.connections.find_by_session(greeter_id) {
            let peer = self
                .peers
                .get(connection.peer_id)
                .ok_or(CallError::PeerUnavailable(connection.peer_id))?;

            let call = SwitchTo {
                connection_id: connection.connection_id,
                service_endpoint: endpoint.to_string_lossy().into_owned(),
            };
            invoke(&peer, &call, self.config.server.call_timeout()).await?;

            self.connections
                .bind(connection.connection_id, target.session_id, connection.peer_id);
            info!(
                "Connection {} switched from login screen {} to session {}",
                connection.connection_id, greeter_id, target.session_id
            );
        }

        self.executor
            .submit(Box::new(EndSessionTask::new(greeter_id)))
            .map_err(|e| CallError::Failed(format!("cannot end login screen {}: {}", greeter_id, e)))?;

        Ok(GreeterOutcome::Switched {
            session_id: target.session_id,
        })
    }

    /// Clean up after a peer's channel closed
    pub async fn peer_disconnected(&self, peer: PeerId) {
        for connection in self.connections.drain_peer(peer) {
            if let Err(e) = self.detach_session(connection.session_id).await {
                warn!(
                    "Failed to detach session {} of {}: {}",
                    connection.session_id, peer, e
                );
            }
        }
        self.peers.remove(peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthError;
    use crate::config::{Config, PropertyValue};

    fn token(name: &str) -> UserToken {
        UserToken {
            username: name.to_string(),
            uid: 1000,
            gid: 1000,
            home: PathBuf::from("/tmp"),
            shell: PathBuf::from("/bin/sh"),
        }
    }

    fn park(app: &AppContext, session_id: u32) -> Session {
        app.sessions.transition(session_id, ConnectState::Active).unwrap();
        app.sessions
            .transition(session_id, ConnectState::Disconnected)
            .unwrap()
    }

    #[test]
    fn test_acquire_prefers_disconnected_session() {
        let app = crate::context::test_context();
        let first = app.acquire_user_session("alice", "corp", token("alice"), None);
        assert_eq!(first.connect_state, ConnectState::Init);
        park(&app, first.session_id);

        // no backend running in the test context, so it comes back for a restart
        let again = app.acquire_user_session("alice", "CORP", token("alice"), None);
        assert_eq!(again.session_id, first.session_id);
        assert_eq!(again.connect_state, ConnectState::Init);
    }

    #[test]
    fn test_acquire_never_shares_claimed_session() {
        let app = crate::context::test_context();
        let first = app.acquire_user_session("alice", "corp", token("alice"), None);
        let starting = app.acquire_user_session("alice", "corp", token("alice"), None);
        assert_ne!(starting.session_id, first.session_id);

        app.sessions.transition(first.session_id, ConnectState::Active).unwrap();
        let third = app.acquire_user_session("alice", "corp", token("alice"), None);
        assert_ne!(third.session_id, first.session_id);
        assert_ne!(third.session_id, starting.session_id);
        assert!(third.authenticated);
        assert_eq!(third.module_name, "X11");
    }

    #[test]
    fn test_acquire_reuses_down_session() {
        let app = crate::context::test_context();
        let first = app.acquire_user_session("alice", "corp", token("alice"), None);
        app.sessions.transition(first.session_id, ConnectState::Down).unwrap();

        let again = app.acquire_user_session("alice", "corp", token("alice"), None);
        assert_eq!(again.session_id, first.session_id);
        assert_eq!(again.connect_state, ConnectState::Init);
    }

    #[test]
    fn test_reconnect_can_be_disabled() {
        let mut config = Config::default_config();
        config.properties = toml::toml! {
            [session]
            reconnect = false
        };
        let app = crate::context::test_context_with(config);
        assert_eq!(
            app.properties.get_bool(0, SESSION_RECONNECT_KEY),
            Some(false)
        );

        let first = app.acquire_user_session("alice", "corp", token("alice"), None);
        park(&app, first.session_id);

        let second = app.acquire_user_session("alice", "corp", token("alice"), None);
        assert_ne!(second.session_id, first.session_id);
    }

    #[tokio::test]
    async fn test_failed_start_returns_session_to_down() {
        // test context has no modules registered
        let app = crate::context::test_context();
        let session = app.acquire_user_session("alice", "corp", token("alice"), None);

        let err = app.ensure_session_running(session.clone()).await.unwrap_err();
        assert!(matches!(err, CallError::Module(_)));
        assert_eq!(
            app.sessions.get_session(session.session_id).unwrap().connect_state,
            ConnectState::Down
        );
    }

    #[tokio::test]
    async fn test_start_requires_a_claimed_session() {
        let app = crate::context::test_context();
        let session = app.acquire_user_session("alice", "corp", token("alice"), None);
        let active = app
            .sessions
            .transition(session.session_id, ConnectState::Active)
            .unwrap();

        let err = app.ensure_session_running(active).await.unwrap_err();
        assert!(matches!(err, CallError::Failed(_)));
        assert_eq!(
            app.sessions.get_session(session.session_id).unwrap().connect_state,
            ConnectState::Active
        );
    }

    #[tokio::test]
    async fn test_idle_reclaim_skips_reconnected_session() {
        let app = crate::context::test_context();
        let session = app.acquire_user_session("alice", "corp", token("alice"), None);
        let parked = park(&app, session.session_id);

        // the user reconnects between the monitor's snapshot and the reclaim
        app.sessions
            .transition(session.session_id, ConnectState::Active)
            .unwrap();

        let reclaimed = app
            .reclaim_idle_session(session.session_id, parked.state_changed_at)
            .await
            .unwrap();
        assert!(!reclaimed);
        let current = app.sessions.get_session(session.session_id).unwrap();
        assert_eq!(current.connect_state, ConnectState::Active);
        assert!(current.authenticated);
    }

    #[tokio::test]
    async fn test_idle_reclaim_ends_untouched_session() {
        let app = crate::context::test_context();
        let session = app.acquire_user_session("alice", "corp", token("alice"), None);
        let parked = park(&app, session.session_id);

        assert!(app
            .reclaim_idle_session(session.session_id, parked.state_changed_at)
            .await
            .unwrap());
        assert!(app.sessions.get_session(session.session_id).is_none());

        // already gone
        assert!(!app
            .reclaim_idle_session(session.session_id, parked.state_changed_at)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_logon_without_greeter_reports_auth_failure() {
        let app = crate::context::test_context();
        let params = LogonParams {
            connection_id: 1,
            username: String::new(),
            domain: String::new(),
            password: Zeroizing::new(String::new()),
            client_settings: None,
        };

        let err = app.logon_user(params, None).await.unwrap_err();
        assert!(matches!(
            err,
            CallError::AuthenticationFailed(AuthError::InvalidCredentials)
        ));
        assert!(app.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_session_override_cleared_on_logoff() {
        let app = crate::context::test_context();
        let session = app.sessions.create_session("alice", "corp", "X11");
        app.properties
            .set_session_override(session.session_id, "session.timeout", PropertyValue::Number(1));

        app.end_session(session.session_id).await.unwrap();
        assert_eq!(app.properties.get_number(session.session_id, "session.timeout"), None);
        assert!(matches!(
            app.end_session(session.session_id).await,
            Err(CallError::SessionNotFound(_))
        ));
    }
}
