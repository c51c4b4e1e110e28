//! Deadline-based beating/stale peer tracking (§4.5): the actual verdict
//! the rest of the daemon acts on. A peer is `Beating` as long as a
//! heartbeat arrived within `timeout` seconds; once that deadline passes
//! it's `Stale`, independent of the optional phi-accrual score in
//! `suspicion.rs`.

use std::collections::HashMap;

use parking_lot::RwLock;

/// Default inter-heartbeat period (§6 `hb_period`).
pub const DEFAULT_HB_PERIOD_SECS: f64 = 5.0;
/// Default beating/stale deadline (§6 `timeout`).
pub const DEFAULT_TIMEOUT_SECS: f64 = 15.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerVerdict {
    Beating,
    Stale,
}

struct PeerRecord {
    last_seen: f64,
    verdict: PeerVerdict,
}

/// Per-peer last-seen timestamps and the beating/stale verdict derived
/// from them against a fixed `timeout`.
pub struct PeerTracker {
    timeout_secs: f64,
    peers: RwLock<HashMap<String, PeerRecord>>,
}

impl PeerTracker {
    #[must_use]
    pub fn new(timeout_secs: f64) -> Self {
        Self { timeout_secs, peers: RwLock::new(HashMap::new()) }
    }

    pub fn record_heartbeat(&self, peer: &str, now: f64) {
        self.peers.write().insert(peer.to_string(), PeerRecord { last_seen: now, verdict: PeerVerdict::Beating });
    }

    /// Re-evaluates every tracked peer's verdict against `now`, returning
    /// the peers whose verdict just flipped from `Beating` to `Stale` so
    /// the caller can raise an event / advance the monitor FSM.
    pub fn sweep(&self, now: f64) -> Vec<String> {
        let mut peers = self.peers.write();
        let mut newly_stale = Vec::new();
        for (name, record) in peers.iter_mut() {
            if record.verdict == PeerVerdict::Beating && now - record.last_seen > self.timeout_secs {
                record.verdict = PeerVerdict::Stale;
                newly_stale.push(name.clone());
            }
        }
        newly_stale
    }

    #[must_use]
    pub fn verdict(&self, peer: &str) -> Option<PeerVerdict> {
        self.peers.read().get(peer).map(|r| r.verdict)
    }

    #[must_use]
    pub fn beating_peers(&self) -> Vec<String> {
        self.peers.read().iter().filter(|(_, r)| r.verdict == PeerVerdict::Beating).map(|(name, _)| name.clone()).collect()
    }

    pub fn remove(&self, peer: &str) {
        self.peers.write().remove(peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_heartbeat_is_beating() {
        let tracker = PeerTracker::new(15.0);
        tracker.record_heartbeat("n2", 100.0);
        assert_eq!(tracker.verdict("n2"), Some(PeerVerdict::Beating));
    }

    #[test]
    fn sweep_past_timeout_marks_stale_once() {
        let tracker = PeerTracker::new(15.0);
        tracker.record_heartbeat("n2", 100.0);
        assert!(tracker.sweep(110.0).is_empty());
        let newly_stale = tracker.sweep(120.0);
        assert_eq!(newly_stale, vec!["n2".to_string()]);
        assert!(tracker.sweep(130.0).is_empty());
        assert_eq!(tracker.verdict("n2"), Some(PeerVerdict::Stale));
    }

    #[test]
    fn fresh_heartbeat_after_stale_recovers_to_beating() {
        let tracker = PeerTracker::new(15.0);
        tracker.record_heartbeat("n2", 100.0);
        tracker.sweep(120.0);
        tracker.record_heartbeat("n2", 125.0);
        assert_eq!(tracker.verdict("n2"), Some(PeerVerdict::Beating));
    }

    #[test]
    fn beating_peers_excludes_stale() {
        let tracker = PeerTracker::new(15.0);
        tracker.record_heartbeat("n2", 100.0);
        tracker.record_heartbeat("n3", 100.0);
        tracker.sweep(120.0);
        tracker.record_heartbeat("n2", 121.0);
        assert_eq!(tracker.beating_peers(), vec!["n2".to_string()]);
    }
}
