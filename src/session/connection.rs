//! Client connection to session mapping
//!
//! The front end identifies each RDP client connection by a connection id.
//! Every mapping is owned by the control peer that registered it and is
//! dropped wholesale when that peer goes away.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::rpc::PeerId;

/// One client connection bound to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Front-end connection id
    pub connection_id: u32,
    /// Session the connection is attached to
    pub session_id: u32,
    /// Control peer owning the connection
    pub peer_id: PeerId,
}

/// Registry of client connections keyed by connection id
#[derive(Default)]
pub struct ConnectionStore {
    connections: Mutex<HashMap<u32, Connection>>,
}

impl ConnectionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a connection to a session, replacing any previous binding
    pub fn bind(&self, connection_id: u32, session_id: u32, peer_id: PeerId) -> Option<Connection> {
        let connection = Connection {
            connection_id,
            session_id,
            peer_id,
        };
        debug!(
            "Connection {} -> session {} ({})",
            connection_id, session_id, peer_id
        );
        self.connections.lock().insert(connection_id, connection)
    }

    /// Look up a connection
    pub fn get(&self, connection_id: u32) -> Option<Connection> {
        self.connections.lock().get(&connection_id).copied()
    }

    /// Connection attached to a session, if any
    pub fn find_by_session(&self, session_id: u32) -> Option<Connection> {
        self.connections
            .lock()
            .values()
            .find(|c| c.session_id == session_id)
            .copied()
    }

    /// Detach one connection
    pub fn remove(&self, connection_id: u32) -> Option<Connection> {
        self.connections.lock().remove(&connection_id)
    }

    /// Detach every connection of a session
    pub fn remove_session(&self, session_id: u32) -> Vec<Connection> {
        self.take_where(|c| c.session_id == session_id)
    }

    /// Detach every connection owned by a peer
    pub fn drain_peer(&self, peer_id: PeerId) -> Vec<Connection> {
        self.take_where(|c| c.peer_id == peer_id)
    }

    fn take_where(&self, predicate: impl Fn(&Connection) -> bool) -> Vec<Connection> {
        let mut connections = self.connections.lock();
        let ids: Vec<u32> = connections
            .values()
            .filter(|c| predicate(c))
            .map(|c| c.connection_id)
            .collect();
        ids.iter()
            .filter_map(|id| connections.remove(id))
            .collect()
    }

    /// Number of bound connections
    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    /// True when nothing is bound
    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }
}
