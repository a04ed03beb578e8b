//! Idle-session reclamation policy

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::ConfigAccessor;
use crate::session::{ConnectState, Session};

/// Property holding the idle timeout in minutes
pub const SESSION_TIMEOUT_KEY: &str = "session.timeout";

/// Reclamation is off unless configured
pub const DEFAULT_SESSION_TIMEOUT_MINUTES: i64 = 0;

/// How often the monitor looks at the session list
pub const MONITOR_INTERVAL: Duration = Duration::from_secs(10);

/// A parked session past its timeout, as seen in one snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleSession {
    /// Session id
    pub session_id: u32,
    /// When it was parked; the reclaim only goes ahead if this still holds
    pub idle_since: DateTime<Utc>,
}

/// `Disconnected` sessions idle for longer than their timeout.
///
/// The timeout is read per session; zero or negative disables reclamation.
pub fn expired_sessions(sessions: &[Session], now: DateTime<Utc>, config: &dyn ConfigAccessor) -> Vec<IdleSession> {
    sessions
        .iter()
        .filter(|session| session.connect_state == ConnectState::Disconnected)
        .filter(|session| {
            let minutes = config
                .get_number(session.session_id, SESSION_TIMEOUT_KEY)
                .unwrap_or(DEFAULT_SESSION_TIMEOUT_MINUTES);
            if minutes <= 0 {
                return false;
            }

            let idle = now.signed_duration_since(session.state_changed_at);
            chrono::Duration::try_minutes(minutes).is_some_and(|limit| idle > limit)
        })
        .map(|session| IdleSession {
            session_id: session.session_id,
            idle_since: session.state_changed_at,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PropertyStore, PropertyValue};
    use crate::session::SessionStore;

    fn parked(store: &SessionStore, idle_minutes: i64, now: DateTime<Utc>) -> Session {
        let mut session = store.create_session("alice", "corp", "X11");
        session.connect_state = ConnectState::Disconnected;
        session.state_changed_at = now - chrono::Duration::minutes(idle_minutes);
        session
    }

    fn ids(idle: Vec<IdleSession>) -> Vec<u32> {
        idle.into_iter().map(|s| s.session_id).collect()
    }

    fn timeout(minutes: i64) -> PropertyStore {
        let mut props = PropertyStore::new();
        props.set(SESSION_TIMEOUT_KEY, PropertyValue::Number(minutes));
        props
    }

    #[test]
    fn test_idle_past_timeout_expires() {
        let store = SessionStore::new();
        let now = Utc::now();
        let session = parked(&store, 6, now);

        assert_eq!(
            expired_sessions(&[session.clone()], now, &timeout(5)),
            vec![IdleSession {
                session_id: session.session_id,
                idle_since: session.state_changed_at,
            }]
        );
    }

    #[test]
    fn test_idle_within_timeout_survives() {
        let store = SessionStore::new();
        let now = Utc::now();
        let session = parked(&store, 4, now);

        assert!(expired_sessions(&[session], now, &timeout(5)).is_empty());
    }

    #[test]
    fn test_non_positive_timeout_disables() {
        let store = SessionStore::new();
        let now = Utc::now();
        let sessions = vec![parked(&store, 600, now)];

        assert!(expired_sessions(&sessions, now, &timeout(-1)).is_empty());
        assert!(expired_sessions(&sessions, now, &timeout(0)).is_empty());
        assert!(expired_sessions(&sessions, now, &PropertyStore::new()).is_empty());
    }

    #[test]
    fn test_only_disconnected_sessions_count() {
        let store = SessionStore::new();
        let now = Utc::now();
        let mut active = parked(&store, 60, now);
        active.connect_state = ConnectState::Active;
        let mut starting = parked(&store, 60, now);
        starting.connect_state = ConnectState::Init;

        assert!(expired_sessions(&[active, starting], now, &timeout(5)).is_empty());
    }

    #[test]
    fn test_per_session_override() {
        let store = SessionStore::new();
        let now = Utc::now();
        let short = parked(&store, 10, now);
        let long = parked(&store, 10, now);

        let props = timeout(30);
        props.set_session_override(short.session_id, SESSION_TIMEOUT_KEY, PropertyValue::Number(5));

        assert_eq!(ids(expired_sessions(&[short.clone(), long], now, &props)), vec![short.session_id]);
    }
}
