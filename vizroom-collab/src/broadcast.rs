//! Fan-out of encoded frames to every connection of a room.
//!
//! Uses a tokio broadcast channel: one send reaches every subscriber, each
//! subscriber buffers up to `capacity` frames. Frames carry their origin so
//! a connection can skip what it sent itself.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

/// A pre-encoded frame plus the participant it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayFrame {
    /// `None` for frames generated by the relay itself.
    pub origin: Option<Uuid>,
    pub bytes: Vec<u8>,
}

impl RelayFrame {
    pub fn is_from(&self, user_id: Uuid) -> bool {
        self.origin == Some(user_id)
    }
}

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub active_peers: usize,
}

/// Lock-free counters for the hot path.
struct AtomicBroadcastStats {
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
}

impl AtomicBroadcastStats {
    fn new() -> Self {
        Self {
            frames_sent: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        }
    }
}

/// Broadcast group of one room.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<RelayFrame>>,
    peers: Arc<RwLock<HashSet<Uuid>>>,
    capacity: usize,
    atomic_stats: Arc<AtomicBroadcastStats>,
}

impl BroadcastGroup {
    /// `capacity` frames are buffered per peer before a lagging peer drops frames.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            peers: Arc::new(RwLock::new(HashSet::new())),
            capacity,
            atomic_stats: Arc::new(AtomicBroadcastStats::new()),
        }
    }

    /// Register a peer and return its receiver.
    pub async fn add_peer(&self, peer_id: Uuid) -> broadcast::Receiver<Arc<RelayFrame>> {
        self.peers.write().await.insert(peer_id);
        self.sender.subscribe()
    }

    pub async fn remove_peer(&self, peer_id: &Uuid) -> bool {
        self.peers.write().await.remove(peer_id)
    }

    /// Send a frame to every subscriber. Returns the number of receivers.
    pub fn broadcast(&self, origin: Option<Uuid>, bytes: Vec<u8>) -> usize {
        let count = self
            .sender
            .send(Arc::new(RelayFrame { origin, bytes }))
            .unwrap_or(0);
        self.atomic_stats.frames_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Account for frames a lagging receiver skipped.
    pub fn record_dropped(&self, n: u64) {
        self.atomic_stats.frames_dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn has_peer(&self, peer_id: &Uuid) -> bool {
        self.peers.read().await.contains(peer_id)
    }

    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            frames_sent: self.atomic_stats.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.atomic_stats.frames_dropped.load(Ordering::Relaxed),
            active_peers: self.peers.read().await.len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
