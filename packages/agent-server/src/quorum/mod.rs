//! Quorum and arbitrator (C10, §4.10): decides whether this node's side
//! of a network split retains a cluster majority, consulting an external
//! arbitrator for even-node-count clusters via the `daemon_blacklist_status`
//! action.

use std::sync::Arc;

use agent_core::QuorumLost;
use reqwest::Client;

use crate::heartbeat::PeerTracker;

/// An external arbitrator reachable over HTTP, consulted when the live
/// peer count alone can't establish majority (even total node count).
pub struct Arbitrator {
    client: Client,
    url: String,
}

impl Arbitrator {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { client: Client::new(), url: url.into() }
    }

    /// Pings the arbitrator's `daemon_blacklist_status` action; `true`
    /// means the arbitrator has not blacklisted this node (i.e. it still
    /// considers this side viable).
    pub async fn ping(&self) -> bool {
        let Ok(response) = self
            .client
            .post(&self.url)
            .json(&agent_core::Request { action: "daemon_blacklist_status".to_string(), options: serde_json::json!({}), node: None })
            .send()
            .await
        else {
            return false;
        };
        response.status().is_success()
    }
}

/// Evaluates quorum from the set of currently-beating peers against the
/// total known node count, consulting each configured arbitrator in order
/// whenever the live side alone can't establish majority (§4.10).
pub struct QuorumMonitor {
    total_nodes: usize,
    peer_tracker: Arc<PeerTracker>,
    arbitrators: Vec<Arbitrator>,
}

impl QuorumMonitor {
    #[must_use]
    pub fn new(total_nodes: usize, peer_tracker: Arc<PeerTracker>, arbitrators: Vec<Arbitrator>) -> Self {
        Self { total_nodes, peer_tracker, arbitrators }
    }

    /// # Errors
    /// Returns `QuorumLost` if this node's visible partition (self plus
    /// beating peers, plus any arbitrator votes) cannot establish
    /// majority.
    pub async fn evaluate(&self) -> Result<(), QuorumLost> {
        let mut live_votes = self.peer_tracker.beating_peers().len() + 1;
        if live_votes * 2 > self.total_nodes {
            return Ok(());
        }

        for arbitrator in &self.arbitrators {
            if arbitrator.ping().await {
                live_votes += 1;
                if live_votes * 2 > self.total_nodes {
                    return Ok(());
                }
            }
        }

        Err(QuorumLost { live_votes, total_nodes: self.total_nodes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn majority_of_nodes_has_quorum() {
        let tracker = Arc::new(PeerTracker::new(15.0));
        tracker.record_heartbeat("n2", 0.0);
        tracker.record_heartbeat("n3", 0.0);
        let monitor = QuorumMonitor::new(5, tracker, Vec::new());
        assert!(monitor.evaluate().await.is_ok());
    }

    #[tokio::test]
    async fn minority_loses_quorum_without_arbitrator() {
        let tracker = Arc::new(PeerTracker::new(15.0));
        let monitor = QuorumMonitor::new(5, tracker, Vec::new());
        assert!(monitor.evaluate().await.is_err());
    }

    #[tokio::test]
    async fn even_split_without_arbitrator_loses_quorum() {
        let tracker = Arc::new(PeerTracker::new(15.0));
        tracker.record_heartbeat("n2", 0.0);
        let monitor = QuorumMonitor::new(4, tracker, Vec::new());
        let err = monitor.evaluate().await.unwrap_err();
        assert_eq!(err.live_votes, 2);
        assert_eq!(err.total_nodes, 4);
    }

    #[tokio::test]
    async fn first_arbitrator_reaching_majority_short_circuits_the_rest() {
        let tracker = Arc::new(PeerTracker::new(15.0));
        let monitor = QuorumMonitor::new(4, tracker, vec![Arbitrator::new("http://127.0.0.1:1/unreachable-0"), Arbitrator::new("http://127.0.0.1:1/unreachable-1")]);
        // Neither arbitrator URL is reachable, so both pings fail; the
        // side still loses quorum, but every configured arbitrator must
        // have been consulted in order before giving up.
        let err = monitor.evaluate().await.unwrap_err();
        assert_eq!(err.live_votes, 1);
        assert_eq!(err.total_nodes, 4);
    }
}
