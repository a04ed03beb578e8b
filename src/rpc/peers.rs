//! Registry of connected control peers

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::channel::RpcChannel;

/// Identifier of one accepted control connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Live control connections, used for outbound calls towards a peer
#[derive(Default)]
pub struct PeerRegistry {
    peers: Mutex<HashMap<PeerId, Arc<RpcChannel>>>,
    next_id: AtomicU64,
}

impl PeerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new peer and assign its id
    pub fn register(&self, channel: Arc<RpcChannel>) -> PeerId {
        let id = PeerId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.peers.lock().insert(id, channel);
        id
    }

    /// Channel for a peer, if still connected
    pub fn get(&self, id: PeerId) -> Option<Arc<RpcChannel>> {
        self.peers.lock().get(&id).cloned()
    }

    /// Forget a peer
    pub fn remove(&self, id: PeerId) -> Option<Arc<RpcChannel>> {
        self.peers.lock().remove(&id)
    }

    /// Number of connected peers
    pub fn len(&self) -> usize {
        self.peers.lock().len()
    }

    /// True when no peer is connected
    pub fn is_empty(&self) -> bool {
        self.peers.lock().is_empty()
    }

    /// Remove every peer, returning their channels
    pub fn drain(&self) -> Vec<Arc<RpcChannel>> {
        self.peers.lock().drain().map(|(_, channel)| channel).collect()
    }
}
