//! Peer pool contract and an in-memory implementation.

use alloy_primitives::B512;
use parking_lot::RwLock;
use std::time::{Duration, Instant};

/// Network-level identifier of a remote peer.
pub type PeerId = B512;

/// Handle to a remote peer, borrowed from the pool for one active job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub id: PeerId,
    /// The peer advertises the header-serving capability.
    pub serve_headers: bool,
}

impl Peer {
    pub fn new(id: PeerId) -> Self {
        Self {
            id,
            serve_headers: true,
        }
    }
}

/// Pool of connected peers. Membership and discovery live elsewhere; the
/// fetcher only borrows idle peers, flips their idle flag for the duration of
/// one active job, and bans the ones that misbehave.
pub trait PeerPool: Send + Sync {
    /// Returns an unused peer matching the optional capability predicate.
    fn idle(&self, filter: Option<&dyn Fn(&Peer) -> bool>) -> Option<Peer>;

    /// Flips a peer's idle flag. Only the fetcher holding the assignment may
    /// call this.
    fn set_idle(&self, peer: PeerId, idle: bool);

    /// Takes the peer out of rotation for `duration`.
    fn ban(&self, peer: PeerId, duration: Duration);

    /// Whether the peer is currently a usable pool member.
    fn contains(&self, peer: PeerId) -> bool;
}

#[derive(Debug)]
struct PoolEntry {
    peer: Peer,
    idle: bool,
    banned_until: Option<Instant>,
}

impl PoolEntry {
    fn is_banned(&self) -> bool {
        self.banned_until.is_some_and(|until| Instant::now() < until)
    }
}

/// In-memory peer pool for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryPeerPool {
    entries: RwLock<Vec<PoolEntry>>,
}

impl MemoryPeerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a peer in idle state. Duplicate ids are ignored.
    pub fn add_peer(&self, peer: Peer) {
        let mut entries = self.entries.write();
        if entries.iter().any(|entry| entry.peer.id == peer.id) {
            return;
        }
        entries.push(PoolEntry {
            peer,
            idle: true,
            banned_until: None,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl PeerPool for MemoryPeerPool {
    fn idle(&self, filter: Option<&dyn Fn(&Peer) -> bool>) -> Option<Peer> {
        let entries = self.entries.read();
        entries
            .iter()
            .find(|entry| {
                entry.idle
                    && !entry.is_banned()
                    && filter.is_none_or(|predicate| predicate(&entry.peer))
            })
            .map(|entry| entry.peer.clone())
    }

    fn set_idle(&self, peer: PeerId, idle: bool) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.iter_mut().find(|entry| entry.peer.id == peer) {
            entry.idle = idle;
        }
    }

    fn ban(&self, peer: PeerId, duration: Duration) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.iter_mut().find(|entry| entry.peer.id == peer) {
            entry.banned_until = Some(Instant::now() + duration);
            entry.idle = false;
            tracing::debug!(peer = %peer, ban_ms = duration.as_millis() as u64, "peer banned");
        }
    }

    fn contains(&self, peer: PeerId) -> bool {
        let entries = self.entries.read();
        entries
            .iter()
            .any(|entry| entry.peer.id == peer && !entry.is_banned())
    }
}
