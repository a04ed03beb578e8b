//! Session record types

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::ConnectState;

/// Process-launch identity produced by authentication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserToken {
    /// Login name
    pub username: String,
    /// User ID
    pub uid: u32,
    /// Primary group ID
    pub gid: u32,
    /// Home directory
    pub home: PathBuf,
    /// Login shell
    pub shell: PathBuf,
}

/// Display settings requested by the client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Requested width in pixels
    pub width: u32,
    /// Requested height in pixels
    pub height: u32,
    /// Requested colour depth in bits per pixel
    pub color_depth: u32,
}

/// One desktop session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique, never reused
    pub session_id: u32,
    /// Login name the session belongs to
    pub username: String,
    /// Domain the session belongs to
    pub domain: String,
    /// Current connect state
    pub connect_state: ConnectState,
    /// When `connect_state` last changed
    pub state_changed_at: DateTime<Utc>,
    /// Backend module serving the session
    pub module_name: String,
    /// Backend endpoint once the module is running
    pub pipe_endpoint: Option<PathBuf>,
    /// Extra environment passed to the backend
    pub environment: BTreeMap<String, String>,
    /// Launch identity, absent for unauthenticated sessions
    pub user_token: Option<UserToken>,
    /// False for login-screen sessions
    pub authenticated: bool,
    /// Last display settings requested or negotiated
    pub client_settings: Option<ClientSettings>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub(crate) fn new(session_id: u32, username: &str, domain: &str, module_name: &str) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            username: username.to_string(),
            domain: domain.to_string(),
            connect_state: ConnectState::Down,
            state_changed_at: now,
            module_name: module_name.to_string(),
            pipe_endpoint: None,
            environment: BTreeMap::new(),
            user_token: None,
            authenticated: false,
            client_settings: None,
            created_at: now,
        }
    }

    /// Whether this session belongs to `username` in `domain`.
    ///
    /// Usernames compare exactly, domains case-insensitively.
    pub fn matches_user(&self, username: &str, domain: &str) -> bool {
        self.username == username && self.domain.eq_ignore_ascii_case(domain)
    }

    /// `DOMAIN\user` form used in logs
    pub fn qualified_name(&self) -> String {
        if self.domain.is_empty() {
            self.username.clone()
        } else {
            format!("{}\\{}", self.domain, self.username)
        }
    }
}

/// Public view of a session returned by enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Session id
    pub session_id: u32,
    /// Owner
    pub username: String,
    /// Owner domain
    pub domain: String,
    /// Connect state
    pub connect_state: ConnectState,
    /// Backend module
    pub module_name: String,
    /// Whether the owner authenticated
    pub authenticated: bool,
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.session_id,
            username: session.username.clone(),
            domain: session.domain.clone(),
            connect_state: session.connect_state,
            module_name: session.module_name.clone(),
            authenticated: session.authenticated,
        }
    }
}
