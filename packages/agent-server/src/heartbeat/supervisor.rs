//! Heartbeat supervisor (C5, §4.5): drives one or more `HbDriver`s,
//! decrypting/authenticating inbound envelopes, feeding accepted payloads
//! into the cluster state store and peer tracker, and periodically
//! pushing this node's own branch out to every peer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use agent_core::crypt::{self, ClusterKey};
use agent_core::wire::HeartbeatPayload;
use async_trait::async_trait;
use tokio::sync::watch;

use crate::cluster_state::{ApplyOutcome, ClusterState};
use crate::eventbus::EventBus;
use crate::heartbeat::drivers::HbDriver;
use crate::heartbeat::peer::PeerTracker;
use crate::heartbeat::suspicion::SuspicionTracker;
use crate::runtime::{ManagedService, ServiceContext};

/// A full resync goes out at least this often even when there are pending
/// patches to ship instead, bounding how far a peer that missed an earlier
/// full snapshot can drift (§4.6).
const FULL_RESYNC_INTERVAL_TICKS: u64 = 10;

pub struct HeartbeatSupervisor {
    nodename: String,
    cluster_name: String,
    key: ClusterKey,
    drivers: Vec<Arc<dyn HbDriver>>,
    peer_tracker: Arc<PeerTracker>,
    suspicion: Arc<SuspicionTracker>,
    cluster_state: Arc<ClusterState>,
    events: EventBus,
    hb_period_secs: f64,
    ticks_since_full: AtomicU64,
}

impl HeartbeatSupervisor {
    #[must_use]
    pub fn new(
        nodename: String,
        cluster_name: String,
        key: ClusterKey,
        drivers: Vec<Arc<dyn HbDriver>>,
        peer_tracker: Arc<PeerTracker>,
        suspicion: Arc<SuspicionTracker>,
        cluster_state: Arc<ClusterState>,
        events: EventBus,
        hb_period_secs: f64,
    ) -> Self {
        Self { nodename, cluster_name, key, drivers, peer_tracker, suspicion, cluster_state, events, hb_period_secs, ticks_since_full: AtomicU64::new(FULL_RESYNC_INTERVAL_TICKS) }
    }

    /// Encrypts and pushes this node's current branch out over every
    /// configured driver, to every known peer. Ships the pending patch
    /// ops most ticks and falls back to a full snapshot periodically, or
    /// whenever there's nothing to patch (§4.6 step 4).
    async fn broadcast_once(&self, peers: &[String], now: f64) {
        let due_for_full = self.ticks_since_full.load(Ordering::Relaxed) >= FULL_RESYNC_INTERVAL_TICKS;
        let pending = self.cluster_state.drain_local_patches();

        let body = if due_for_full || pending.is_empty() {
            self.ticks_since_full.store(0, Ordering::Relaxed);
            agent_core::wire::HeartbeatBody::Full(self.cluster_state.own_tree())
        } else {
            self.ticks_since_full.fetch_add(1, Ordering::Relaxed);
            agent_core::wire::HeartbeatBody::Deltas(pending)
        };
        let kind = if matches!(body, agent_core::wire::HeartbeatBody::Full(_)) { agent_core::wire::HeartbeatKind::Full } else { agent_core::wire::HeartbeatKind::Patch };

        let payload = HeartbeatPayload { kind, gen: self.cluster_state.peer_gen(&self.nodename), updated: now, compat: 1, monitor: body };
        let Ok(bytes) = serde_json::to_vec(&payload) else { return };
        let Ok(envelope) = crypt::encrypt(&self.key, &self.cluster_name, &self.nodename, &bytes) else { return };
        let Ok(envelope_bytes) = serde_json::to_vec(&envelope) else { return };

        for driver in &self.drivers {
            for peer in peers {
                if let Err(e) = driver.send(peer, &envelope_bytes).await {
                    tracing::debug!(driver = driver.name(), peer, error = %e, "heartbeat send failed");
                }
            }
        }
    }

    async fn process_inbound(&self, driver: &Arc<dyn HbDriver>, now: f64) {
        match driver.recv().await {
            Ok(frame) => {
                let Ok(envelope) = serde_json::from_slice::<agent_core::Envelope>(&frame.payload) else { return };
                let Ok(plaintext) = crypt::decrypt(&self.key, &self.cluster_name, &envelope) else {
                    tracing::warn!(peer = frame.peer, "heartbeat envelope rejected");
                    return;
                };
                let Ok(payload) = serde_json::from_slice::<HeartbeatPayload>(&plaintext) else { return };

                self.peer_tracker.record_heartbeat(&frame.peer, now);
                #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
                self.suspicion.record_heartbeat(&frame.peer, (now * 1000.0) as u64);

                match self.cluster_state.apply_heartbeat(&frame.peer, &payload) {
                    ApplyOutcome::GapDetected => {
                        tracing::info!(peer = frame.peer, "gap in heartbeat generations, requesting full resend");
                        self.events.publish(agent_core::wire::EventRecord {
                            nodename: self.nodename.clone(),
                            kind: agent_core::wire::EventKind::Event,
                            ts: now,
                            data: serde_json::json!({"kind": "request_full", "peer": frame.peer}),
                        });
                    }
                    ApplyOutcome::Applied | ApplyOutcome::Stale => {}
                }
            }
            Err(e) => tracing::debug!(driver = driver.name(), error = %e, "heartbeat recv failed"),
        }
    }

    pub async fn run(self: Arc<Self>, peers: Vec<String>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs_f64(self.hb_period_secs));
        let recv_tasks: Vec<_> = self
            .drivers
            .iter()
            .cloned()
            .map(|driver| {
                let this = self.clone();
                let mut shutdown = shutdown.clone();
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            () = this.process_inbound(&driver, now_unix()) => {}
                            _ = shutdown.changed() => { if *shutdown.borrow() { return; } }
                        }
                    }
                })
            })
            .collect();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let stale = self.peer_tracker.sweep(now_unix());
                    for peer in &stale {
                        self.cluster_state.forget_peer(peer, now_unix());
                        self.events.publish(agent_core::wire::EventRecord {
                            nodename: self.nodename.clone(),
                            kind: agent_core::wire::EventKind::Event,
                            ts: now_unix(),
                            data: serde_json::json!({"kind": "peer_stale", "peer": peer}),
                        });
                    }
                    self.broadcast_once(&peers, now_unix()).await;
                }
                _ = shutdown.changed() => { if *shutdown.borrow() { break; } }
            }
        }
        for task in recv_tasks {
            task.abort();
        }
    }
}

fn now_unix() -> f64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use agent_core::wire::{EventKind, HeartbeatBody, HeartbeatKind};
    use agent_core::DriverError;
    use tokio::sync::Mutex as AsyncMutex;

    use super::*;
    use crate::eventbus::EventBusMessage;
    use crate::heartbeat::drivers::InboundFrame;
    use crate::heartbeat::suspicion::PhiAccrualConfig;

    /// A driver with one canned inbound frame and a sink for outbound
    /// sends, just enough to drive `process_inbound`/`broadcast_once`
    /// without a real socket.
    struct MockDriver {
        inbound: AsyncMutex<std::collections::VecDeque<InboundFrame>>,
    }

    #[async_trait]
    impl HbDriver for MockDriver {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn send(&self, _peer: &str, _payload: &[u8]) -> Result<(), DriverError> {
            Ok(())
        }

        async fn recv(&self) -> Result<InboundFrame, DriverError> {
            self.inbound
                .lock()
                .await
                .pop_front()
                .ok_or_else(|| DriverError { driver: "mock".to_string(), rid: "n2".to_string(), reason: "no frame queued".to_string() })
        }
    }

    fn envelope_for(key: &ClusterKey, cluster_name: &str, peer: &str, payload: &HeartbeatPayload) -> Vec<u8> {
        let bytes = serde_json::to_vec(payload).unwrap();
        let envelope = crypt::encrypt(key, cluster_name, peer, &bytes).unwrap();
        serde_json::to_vec(&envelope).unwrap()
    }

    fn supervisor(cluster_state: Arc<ClusterState>, events: EventBus) -> (Arc<HeartbeatSupervisor>, ClusterKey) {
        let key = ClusterKey::derive(b"s3cret");
        let supervisor = Arc::new(HeartbeatSupervisor::new(
            "n1".to_string(),
            "mycluster".to_string(),
            key.clone(),
            Vec::new(),
            Arc::new(PeerTracker::new(15.0)),
            Arc::new(SuspicionTracker::new(PhiAccrualConfig::default())),
            cluster_state,
            events,
            1.0,
        ));
        (supervisor, key)
    }

    #[tokio::test]
    async fn gap_detected_publishes_a_request_full_event() {
        let state = ClusterState::new("n1", EventBus::default());
        state.apply_heartbeat(
            "n2",
            &HeartbeatPayload { kind: HeartbeatKind::Full, gen: 1, updated: 0.0, compat: 1, monitor: HeartbeatBody::Full(serde_json::json!({})) },
        );

        let events = EventBus::new(8);
        let (supervisor, key) = supervisor(state, events.clone());
        let mut sub = supervisor.events.subscribe();

        let gap_payload = HeartbeatPayload { kind: HeartbeatKind::Patch, gen: 5, updated: 1.0, compat: 1, monitor: HeartbeatBody::Deltas(vec![]) };
        let frame_bytes = envelope_for(&key, "mycluster", "n2", &gap_payload);
        let driver: Arc<dyn HbDriver> = Arc::new(MockDriver { inbound: AsyncMutex::new(std::collections::VecDeque::from([InboundFrame { peer: "n2".to_string(), payload: frame_bytes }])) });

        supervisor.process_inbound(&driver, 2.0).await;

        match sub.recv().await {
            EventBusMessage::Record(r) => {
                assert_eq!(r.kind, EventKind::Event);
                assert_eq!(r.data["kind"], serde_json::json!("request_full"));
                assert_eq!(r.data["peer"], serde_json::json!("n2"));
            }
            EventBusMessage::ResyncRequired => panic!("expected record"),
        }
    }

    #[tokio::test]
    async fn broadcast_sends_full_on_first_tick_then_patches() {
        let events = EventBus::default();
        let state = ClusterState::new("n1", events.clone());
        state.update_local(&["monitor", "status"], serde_json::json!("up"), 1.0);
        let (supervisor, _key) = supervisor(state, events);

        assert_eq!(supervisor.ticks_since_full.load(Ordering::Relaxed), FULL_RESYNC_INTERVAL_TICKS);
        supervisor.broadcast_once(&[], 1.0).await;
        assert_eq!(supervisor.ticks_since_full.load(Ordering::Relaxed), 0);

        supervisor.cluster_state.update_local(&["monitor", "status"], serde_json::json!("down"), 2.0);
        supervisor.broadcast_once(&[], 2.0).await;
        assert_eq!(supervisor.ticks_since_full.load(Ordering::Relaxed), 1);
    }
}

#[async_trait]
impl ManagedService for HeartbeatSupervisor {
    fn name(&self) -> &'static str {
        "heartbeat"
    }

    async fn init(&self, _ctx: &ServiceContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn shutdown(&self, _terminate: bool) -> anyhow::Result<()> {
        Ok(())
    }
}
