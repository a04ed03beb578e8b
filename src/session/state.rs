//! Session connect-state machine
//!
//! ```text
//!            ┌──────┐  start   ┌──────┐  backend ready  ┌────────┐
//!   create ─>│ Down │─────────>│ Init │────────────────>│ Active │
//!            └──────┘          └──────┘                 └──┬──▲──┘
//!               ^                                client    │  │ reconnect
//!               │ backend exit / start failure     drop    v  │
//!               └──────────── (any state) ──────────── ┌──────────────┐
//!                                                      │ Disconnected │
//!                                                      └──────────────┘
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Connect state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectState {
    /// No backend running
    Down,
    /// Backend is being started
    Init,
    /// Backend running and a client is attached
    Active,
    /// Backend running, no client attached
    Disconnected,
}

impl ConnectState {
    /// Whether `self -> next` is an allowed edge
    pub fn can_transition_to(self, next: ConnectState) -> bool {
        use ConnectState::{Active, Disconnected, Down, Init};

        matches!(
            (self, next),
            (_, Down) | (Down, Init) | (Init, Active) | (Active, Disconnected) | (Disconnected, Active)
        )
    }

    /// Stable name used in logs and call payloads
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectState::Down => "Down",
            ConnectState::Init => "Init",
            ConnectState::Active => "Active",
            ConnectState::Disconnected => "Disconnected",
        }
    }
}

impl fmt::Display for ConnectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectState::{self, Active, Disconnected, Down, Init};

    const ALL: [ConnectState; 4] = [Down, Init, Active, Disconnected];

    #[test]
    fn test_allowed_edges() {
        assert!(Down.can_transition_to(Init));
        assert!(Init.can_transition_to(Active));
        assert!(Active.can_transition_to(Disconnected));
        assert!(Disconnected.can_transition_to(Active));
        for state in ALL {
            assert!(state.can_transition_to(Down), "{} -> Down", state);
        }
    }

    #[test]
    fn test_rejected_edges() {
        assert!(!Down.can_transition_to(Active));
        assert!(!Down.can_transition_to(Disconnected));
        assert!(!Init.can_transition_to(Disconnected));
        assert!(!Init.can_transition_to(Init));
        assert!(!Active.can_transition_to(Init));
        assert!(!Active.can_transition_to(Active));
        assert!(!Disconnected.can_transition_to(Init));
        assert!(!Disconnected.can_transition_to(Disconnected));
    }

    #[test]
    fn test_edge_count() {
        let allowed = ALL
            .iter()
            .flat_map(|from| ALL.iter().map(move |to| (*from, *to)))
            .filter(|(from, to)| from.can_transition_to(*to))
            .count();
        // four forward edges plus every state to Down
        assert_eq!(allowed, 8);
    }
}
