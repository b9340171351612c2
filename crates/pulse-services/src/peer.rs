//! Peer registry: the set of peers currently believed to be alive.
//!
//! Written by the discovery listener, snapshotted and pruned by the heartbeat
//! loop. Nothing else in the daemon holds shared mutable state.

use std::fmt;
use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;

use dashmap::DashSet;

/// A remote instance's inbound TCP endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerAddress(SocketAddr);

impl PeerAddress {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self(SocketAddr::new(ip, port))
    }

    pub fn ip(&self) -> IpAddr {
        self.0.ip()
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.0
    }
}

impl From<SocketAddr> for PeerAddress {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for PeerAddress {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// Concurrent set of peer addresses, cheap to clone and share across tasks.
///
/// DashSet shards the set behind per-shard RwLocks: readers share a shard,
/// a writer holds one shard exclusively for the duration of its insert or
/// remove. Each `add`/`remove` is atomic relative to the others.
#[derive(Debug, Clone, Default)]
pub struct PeerRegistry {
    peers: Arc<DashSet<PeerAddress>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert if absent. Returns true iff the address was newly inserted.
    pub fn add(&self, addr: PeerAddress) -> bool {
        self.peers.insert(addr)
    }

    /// Remove if present. No-op otherwise.
    pub fn remove(&self, addr: &PeerAddress) {
        self.peers.remove(addr);
    }

    /// Snapshot of the current members.
    ///
    /// Members are copied out while the shard read locks are held, then the
    /// locks are released before the iterator is returned. A consumer that
    /// stalls never blocks writers.
    pub fn iterate(&self) -> std::vec::IntoIter<PeerAddress> {
        let snapshot: Vec<PeerAddress> = self.peers.iter().map(|entry| *entry.key()).collect();
        snapshot.into_iter()
    }

    pub fn contains(&self, addr: &PeerAddress) -> bool {
        self.peers.contains(addr)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
