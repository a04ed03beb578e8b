//! Concurrent session registry
//!
//! All sessions live in one map behind one lock. The lock is only held for the
//! map operation itself; callers get clones and never keep a guard across I/O.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info};

use super::error::{Result, SessionError};
use super::state::ConnectState;
use super::types::Session;

struct StoreInner {
    sessions: BTreeMap<u32, Session>,
    next_id: u32,
}

/// Registry of all sessions keyed by id
pub struct SessionStore {
    inner: Mutex<StoreInner>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    /// Create an empty store; ids start at 1
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                sessions: BTreeMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Allocate an id and insert a new `Down` session
    pub fn create_session(&self, username: &str, domain: &str, module_name: &str) -> Session {
        let session = {
            let mut inner = self.inner.lock();
            let session_id = inner.next_id;
            inner.next_id += 1;

            let session = Session::new(session_id, username, domain, module_name);
            inner.sessions.insert(session_id, session.clone());
            session
        };

        info!(
            "Created session {} for {} (module {})",
            session.session_id,
            session.qualified_name(),
            session.module_name
        );
        session
    }

    /// Look up a session by id
    pub fn get_session(&self, session_id: u32) -> Option<Session> {
        self.inner.lock().sessions.get(&session_id).cloned()
    }

    /// Lowest-id session of a user, in any state
    pub fn get_first_session_by_user(&self, username: &str, domain: &str) -> Option<Session> {
        self.find_first(|s| s.matches_user(username, domain))
    }

    /// Lowest-id `Disconnected` session of a user
    pub fn get_first_disconnected_session_by_user(&self, username: &str, domain: &str) -> Option<Session> {
        self.get_first_session_by_user_in_state(username, domain, ConnectState::Disconnected)
    }

    /// Lowest-id session of a user in the given state
    pub fn get_first_session_by_user_in_state(
        &self,
        username: &str,
        domain: &str,
        state: ConnectState,
    ) -> Option<Session> {
        self.find_first(|s| s.connect_state == state && s.matches_user(username, domain))
    }

    fn find_first(&self, predicate: impl Fn(&Session) -> bool) -> Option<Session> {
        self.inner
            .lock()
            .sessions
            .values()
            .find(|s| predicate(s))
            .cloned()
    }

    /// Remove a session; removing an unknown id is a no-op
    pub fn remove_session(&self, session_id: u32) -> Option<Session> {
        let removed = self.inner.lock().sessions.remove(&session_id);
        if removed.is_some() {
            info!("Removed session {}", session_id);
        }
        removed
    }

    /// Copy of every session, ordered by id
    pub fn get_all_sessions(&self) -> Vec<Session> {
        self.inner.lock().sessions.values().cloned().collect()
    }

    /// Move a session along an allowed edge of the state machine.
    ///
    /// On a rejected edge the session is left unchanged.
    pub fn transition(&self, session_id: u32, next: ConnectState) -> Result<Session> {
        let mut inner = self.inner.lock();
        let session = inner
            .sessions
            .get_mut(&session_id)
            .ok_or(SessionError::NotFound(session_id))?;

        let from = session.connect_state;
        if !from.can_transition_to(next) {
            return Err(SessionError::InvalidTransition {
                session_id,
                from,
                to: next,
            });
        }

        session.connect_state = next;
        session.state_changed_at = Utc::now();
        debug!("Session {}: {} -> {}", session_id, from, next);
        Ok(session.clone())
    }

    /// Claim a session for a logon of `username@domain` in one critical section.
    ///
    /// Preference: a `Disconnected` session (only when `reconnect` is set),
    /// then an authenticated `Down` one, else a new session on `module_name`.
    /// A parked session whose backend `backend_alive` reports running comes
    /// back `Active`; anything else comes back `Init` and needs its backend
    /// started. `prepare` runs on the claimed session before the lock is
    /// released. `backend_alive` must not call back into the store.
    pub fn claim_user_session<A, P>(
        &self,
        username: &str,
        domain: &str,
        module_name: &str,
        reconnect: bool,
        backend_alive: A,
        prepare: P,
    ) -> Session
    where
        A: Fn(u32) -> bool,
        P: FnOnce(&mut Session),
    {
        let (session, from) = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;

            let parked = |state: ConnectState, s: &Session| {
                s.connect_state == state && s.matches_user(username, domain)
            };
            let found = reconnect
                .then(|| {
                    inner
                        .sessions
                        .values()
                        .find(|s| parked(ConnectState::Disconnected, s))
                })
                .flatten()
                .or_else(|| {
                    inner
                        .sessions
                        .values()
                        .find(|s| parked(ConnectState::Down, s) && s.authenticated)
                })
                .map(|s| s.session_id);

            let session_id = found.unwrap_or_else(|| {
                let id = inner.next_id;
                inner.next_id += 1;
                id
            });
            let session = inner
                .sessions
                .entry(session_id)
                .or_insert_with(|| Session::new(session_id, username, domain, module_name));

            let from = found.map(|_| session.connect_state);
            prepare(&mut *session);

            let next = if from == Some(ConnectState::Disconnected) && backend_alive(session_id) {
                ConnectState::Active
            } else {
                // a dead parked backend passes through Down
                session.pipe_endpoint = None;
                ConnectState::Init
            };
            session.connect_state = next;
            session.state_changed_at = Utc::now();
            (session.clone(), from)
        };

        match from {
            Some(from) => info!(
                "Claimed {} session {} for {} as {}",
                from,
                session.session_id,
                session.qualified_name(),
                session.connect_state
            ),
            None => info!(
                "Created session {} for {} (module {})",
                session.session_id,
                session.qualified_name(),
                session.module_name
            ),
        }
        session
    }

    /// Take a session out of the reuse pool before tearing it down.
    ///
    /// Moves it to `Down` and clears `authenticated`, so no logon can claim it
    /// while its backend is being stopped.
    pub fn retire_session(&self, session_id: u32) -> Result<Session> {
        self.retire_if(session_id, |_| true)
    }

    /// Like [`retire_session`](Self::retire_session), but only for a session
    /// still `Disconnected` since exactly `idle_since`.
    ///
    /// Fails with [`SessionError::Changed`] when it was reconnected, or parked
    /// again, after the caller's snapshot.
    pub fn retire_idle_session(&self, session_id: u32, idle_since: DateTime<Utc>) -> Result<Session> {
        self.retire_if(session_id, |s| {
            s.connect_state == ConnectState::Disconnected && s.state_changed_at == idle_since
        })
    }

    fn retire_if(&self, session_id: u32, accept: impl FnOnce(&Session) -> bool) -> Result<Session> {
        let mut inner = self.inner.lock();
        let session = inner
            .sessions
            .get_mut(&session_id)
            .ok_or(SessionError::NotFound(session_id))?;

        if !accept(session) {
            return Err(SessionError::Changed(session_id));
        }

        let from = session.connect_state;
        session.connect_state = ConnectState::Down;
        session.authenticated = false;
        session.state_changed_at = Utc::now();
        debug!("Session {}: {} -> Down (retired)", session_id, from);
        Ok(session.clone())
    }

    /// Mutate non-state fields of a session under the lock.
    ///
    /// The closure must not change `connect_state`; use [`transition`](Self::transition).
    pub fn update<F>(&self, session_id: u32, f: F) -> Result<Session>
    where
        F: FnOnce(&mut Session),
    {
        let mut inner = self.inner.lock();
        let session = inner
            .sessions
            .get_mut(&session_id)
            .ok_or(SessionError::NotFound(session_id))?;

        let state = session.connect_state;
        f(session);
        if session.connect_state != state {
            session.connect_state = state;
            return Err(SessionError::InvalidTransition {
                session_id,
                from: state,
                to: state,
            });
        }

        Ok(session.clone())
    }

    /// Number of sessions
    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    /// True when no session exists
    pub fn is_empty(&self) -> bool {
        self.inner.lock().sessions.is_empty()
    }
}
