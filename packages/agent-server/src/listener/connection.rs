//! Connection bookkeeping for the framed TCP listener (C8), generalized
//! from the teacher's `network::connection::ConnectionRegistry` --
//! lock-free tracking via `DashMap`, one bounded outbound channel per
//! connection for backpressure -- down to the subset this protocol needs
//! (no pub/sub subscription metadata, since every request gets exactly
//! one response).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

/// Whether a connection arrived over the listener's client-facing port or
/// is a peer relaying a request on a cluster peer's behalf -- both use the
/// same wire framing, but the classifier tags the `OperationContext`
/// differently (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    Client,
    Peer,
}

pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub kind: ConnectionKind,
    pub connected_at: Instant,
    tx: mpsc::Sender<Vec<u8>>,
}

impl ConnectionHandle {
    #[must_use]
    pub fn try_send(&self, frame: Vec<u8>) -> bool {
        self.tx.try_send(frame).is_ok()
    }
}

/// Tracks every open connection so shutdown can account for in-flight
/// work and the worker pool bound (§5, default 16) can be enforced.
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    connections: DashMap<ConnectionId, Arc<ConnectionHandle>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self { next_id: AtomicU64::new(1), connections: DashMap::new() }
    }

    pub fn register(&self, kind: ConnectionKind, tx: mpsc::Sender<Vec<u8>>) -> Arc<ConnectionHandle> {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handle = Arc::new(ConnectionHandle { id, kind, connected_at: Instant::now(), tx });
        self.connections.insert(id, Arc::clone(&handle));
        handle
    }

    pub fn remove(&self, id: ConnectionId) {
        self.connections.remove(&id);
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.connections.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_remove_updates_count() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(8);
        let handle = registry.register(ConnectionKind::Client, tx);
        assert_eq!(registry.count(), 1);
        registry.remove(handle.id);
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn try_send_delivers_to_receiver() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::channel(8);
        let handle = registry.register(ConnectionKind::Peer, tx);
        assert!(handle.try_send(vec![1, 2, 3]));
        assert_eq!(rx.recv().await, Some(vec![1, 2, 3]));
    }
}
