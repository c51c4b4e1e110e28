//! Monitor/orchestrator tick loop (C9, §4.9). Generalizes the teacher's
//! partition-assignment + rebalance-planning pair
//! (`cluster::assignment::{compute_assignment, plan_rebalance,
//! order_migrations}`) from *partition* ownership to *object placement*
//! leadership, and from *migration ordering by replica risk* to *FSM
//! transition ordering by "never tear down `started` before its
//! replacement is `ready`"*.

use std::collections::HashMap;
use std::sync::Arc;

use agent_core::wire::{EventKind, EventRecord, GlobalExpect};
use agent_core::{DriverError, ObjectPath, QuorumLost};
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::cluster_state::ClusterState;
use crate::eventbus::EventBus;
use crate::monitor::driver::{MonitorAction, ResourceDriver};
use crate::monitor::fsm::{InstanceState, ObjectMonitor, DEFAULT_MAINTENANCE_GRACE_PERIOD, DEFAULT_READY_PERIOD, DEFAULT_REJOIN_GRACE_PERIOD};
use crate::monitor::placement::{placement_leader, Candidate};
use crate::runtime::{ManagedService, ServiceContext};

/// What a single tick decided to do with an object's local instance.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    NoOp,
    EnterReady,
    CallStart,
    CallStop,
    CallFreeze,
    CallThaw,
    CallProvision,
    CallUnprovision,
    Purge,
    Delete,
    Abort(String),
}

/// Flex-topology scaling decision (§4.9 rule 10): scale by one instance
/// per tick until `flex_min_nodes <= running_instances <= flex_max_nodes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlexDecision {
    ScaleUp,
    ScaleDown,
    Satisfied,
}

#[must_use]
pub fn flex_scale_decision(running_instances: u32, flex_min_nodes: u32, flex_max_nodes: u32) -> FlexDecision {
    if running_instances < flex_min_nodes {
        FlexDecision::ScaleUp
    } else if running_instances > flex_max_nodes {
        FlexDecision::ScaleDown
    } else {
        FlexDecision::Satisfied
    }
}

/// Filters candidates whose placement would colocate with an
/// `anti_affinity`-listed object already running on them (§4.9 rule 9).
#[must_use]
pub fn apply_anti_affinity<'a>(candidates: &'a [Candidate], colocated_with_conflict: &[String]) -> Vec<&'a Candidate> {
    candidates.iter().filter(|c| !colocated_with_conflict.contains(&c.nodename)).collect()
}

/// Pure decision function for one object's tick (§4.9 rules 5-8): given
/// its current local state, whether this node is the placement leader,
/// the authoritative `global_expect`, and the two grace-period gates,
/// decides the next action without performing any I/O.
#[must_use]
#[allow(clippy::too_many_arguments)]
pub fn decide_transition(
    monitor: &ObjectMonitor,
    is_leader: bool,
    expect: GlobalExpect,
    now: f64,
    rejoin_grace_active: bool,
    maintenance_grace_active: bool,
    preempted_by_peer: bool,
) -> Decision {
    use InstanceState::{Frozen, Freezing, Idle, Provisioning, Purged, Ready, Started, Starting, Stopped, Thawing, Unprovisioning};

    if monitor.state.is_terminal() && expect != GlobalExpect::Aborted {
        return Decision::NoOp;
    }

    match expect {
        GlobalExpect::Started | GlobalExpect::Placed => {
            if !is_leader {
                // Non-leaders reconcile down to stopped (rule 5).
                return match monitor.state {
                    Started | Starting | Ready => Decision::CallStop,
                    _ => Decision::NoOp,
                };
            }
            if rejoin_grace_active || maintenance_grace_active {
                return Decision::NoOp;
            }
            match monitor.state {
                Stopped | Idle => Decision::EnterReady,
                Ready => {
                    // A peer already `starting` with a lower `(timestamp,
                    // nodename)` wins the race; we stay put (rule 5).
                    if preempted_by_peer {
                        return Decision::NoOp;
                    }
                    let held = monitor.ready_since.is_some_and(|since| now - since >= DEFAULT_READY_PERIOD.as_secs_f64());
                    if held { Decision::CallStart } else { Decision::NoOp }
                }
                Starting | Started => Decision::NoOp,
                _ => Decision::NoOp,
            }
        }
        GlobalExpect::Stopped => match monitor.state {
            Started | Starting | Ready => Decision::CallStop,
            _ => Decision::NoOp,
        },
        GlobalExpect::Frozen => match monitor.state {
            Frozen | Freezing => Decision::NoOp,
            _ => Decision::CallFreeze,
        },
        GlobalExpect::Thawed => match monitor.state {
            Frozen | Freezing => Decision::CallThaw,
            _ => Decision::NoOp,
        },
        GlobalExpect::Provisioned => match monitor.state {
            Idle | Stopped => Decision::CallProvision,
            _ => Decision::NoOp,
        },
        GlobalExpect::Unprovisioned => match monitor.state {
            Stopped | Idle | Provisioning => Decision::CallUnprovision,
            _ => Decision::NoOp,
        },
        GlobalExpect::Purged => {
            if monitor.can_purge() { Decision::Purge } else { Decision::Abort("purged requires unprovisioned first".to_string()) }
        }
        GlobalExpect::Deleted => {
            if monitor.state == Stopped || monitor.state == Idle || monitor.state == Unprovisioning {
                Decision::Delete
            } else {
                Decision::Abort("deleted requires a stopped instance".to_string())
            }
        }
        GlobalExpect::Aborted => Decision::Abort("aborted by operator".to_string()),
    }
}

/// Applies a `Decision` to `monitor.state`, returning the new state. A
/// separate step from `decide_transition` so the orchestrator can log and
/// call the resource driver before committing the FSM edge.
#[must_use]
pub fn apply_decision(monitor: &ObjectMonitor, decision: &Decision, now: f64) -> ObjectMonitor {
    let mut next = monitor.clone();
    match decision {
        Decision::NoOp => {}
        Decision::EnterReady => {
            next.state = InstanceState::Ready;
            next.ready_since = Some(now);
        }
        Decision::CallStart => next.state = InstanceState::Starting,
        Decision::CallStop => {
            next.state = InstanceState::Stopping;
            next.ready_since = None;
        }
        Decision::CallFreeze => next.state = InstanceState::Freezing,
        Decision::CallThaw => next.state = InstanceState::Thawing,
        Decision::CallProvision => next.state = InstanceState::Provisioning,
        Decision::CallUnprovision => next.state = InstanceState::Unprovisioning,
        Decision::Purge => next.state = InstanceState::Purged,
        Decision::Delete => next.state = InstanceState::Deleting,
        Decision::Abort(_) => next.state = InstanceState::Idle,
    }
    if next.state != monitor.state {
        next.state_since = now;
    }
    next
}

/// Ties the pure FSM above to cluster state, the event bus, and resource
/// drivers; one instance per daemon.
pub struct MonitorOrchestrator {
    nodename: String,
    cluster_state: Arc<ClusterState>,
    events: EventBus,
    daemon_start: f64,
    objects: RwLock<HashMap<ObjectPath, ObjectMonitor>>,
    drivers: RwLock<HashMap<ObjectPath, Arc<dyn ResourceDriver>>>,
}

impl MonitorOrchestrator {
    #[must_use]
    pub fn new(nodename: impl Into<String>, cluster_state: Arc<ClusterState>, events: EventBus, daemon_start: f64) -> Self {
        Self { nodename: nodename.into(), cluster_state, events, daemon_start, objects: RwLock::new(HashMap::new()), drivers: RwLock::new(HashMap::new()) }
    }

    pub fn register(&self, path: ObjectPath, driver: Arc<dyn ResourceDriver>, restart_budget: u32) {
        self.objects.write().entry(path.clone()).or_insert_with(|| ObjectMonitor::new(restart_budget));
        self.drivers.write().insert(path, driver);
    }

    fn rejoin_grace_active(&self, now: f64) -> bool {
        now - self.daemon_start < DEFAULT_REJOIN_GRACE_PERIOD.as_secs_f64()
    }

    /// Executes one monitor tick for `path` (§4.9 rules 1-8). Returns the
    /// decision taken, or `Err(QuorumLost)` if rule 3 (quorum check) skips
    /// every state-changing transition.
    ///
    /// # Errors
    /// Propagates `QuorumLost` from `quorum_ok` being `false`; propagates
    /// `DriverError` from a failed `start`/`stop`/`provision`/`unprovision`
    /// call, decrementing the object's restart budget and raising
    /// `monitor_action` on exhaustion.
    pub async fn tick(
        &self,
        path: &ObjectPath,
        candidates: &[Candidate],
        expect: GlobalExpect,
        now: f64,
        quorum_ok: bool,
        maintenance_grace_active: bool,
    ) -> Result<Decision, QuorumLost> {
        if !quorum_ok {
            return Err(QuorumLost { live_votes: 0, total_nodes: candidates.len() + 1 });
        }

        let leader = placement_leader(candidates);
        let is_leader = leader.is_some_and(|l| l.nodename == self.nodename);

        let current = {
            let objects = self.objects.read();
            objects.get(path).cloned().unwrap_or_else(|| ObjectMonitor::new(3))
        };

        let rejoin_active = self.rejoin_grace_active(now);
        let preempted_by_peer = current.state == InstanceState::Ready && current.ready_since.is_some_and(|since| self.peer_preempts(path, candidates, since));
        let decision = decide_transition(&current, is_leader, expect, now, rejoin_active, maintenance_grace_active, preempted_by_peer);

        if let Decision::Abort(reason) = &decision {
            self.events.publish(EventRecord {
                nodename: self.nodename.clone(),
                kind: EventKind::Event,
                ts: now,
                data: serde_json::json!({"kind": "orchestration_abort", "path": path.to_string(), "reason": reason}),
            });
        }

        let next = apply_decision(&current, &decision, now);
        let committed = self.invoke_driver(path, &decision, next, now).await;
        self.objects.write().insert(path.clone(), committed.clone());
        let key = path.to_string().replace('/', "_");
        self.cluster_state.update_local(&["services", &key, "instance_state"], serde_json::json!(format!("{:?}", committed.state)), now);
        self.cluster_state.update_local(&["services", &key, "state_since"], serde_json::json!(committed.state_since), now);
        Ok(decision)
    }

    /// Rule 5 preemption tie-break: true if some other candidate node's
    /// replica of this object is already `starting` with a lower
    /// `(timestamp, nodename)` than our own `(our_ready_since,
    /// self.nodename)`.
    fn peer_preempts(&self, path: &ObjectPath, candidates: &[Candidate], our_ready_since: f64) -> bool {
        let key = path.to_string().replace('/', "_");
        let snapshot = self.cluster_state.snapshot();
        candidates.iter().filter(|c| c.nodename != self.nodename).any(|c| {
            let branch = snapshot.get(&c.nodename).and_then(|b| b.get("services")).and_then(|s| s.get(&key));
            let peer_state = branch.and_then(|b| b.get("instance_state")).and_then(|v| v.as_str());
            let peer_since = branch.and_then(|b| b.get("state_since")).and_then(serde_json::Value::as_f64);
            match (peer_state, peer_since) {
                (Some("Starting"), Some(since)) => (since, &c.nodename) < (our_ready_since, &self.nodename),
                _ => false,
            }
        })
    }

    async fn invoke_driver(&self, path: &ObjectPath, decision: &Decision, mut next: ObjectMonitor, now: f64) -> ObjectMonitor {
        let driver = self.drivers.read().get(path).cloned();
        let result: Option<Result<(), DriverError>> = match (decision, &driver) {
            (Decision::CallStart, Some(d)) => Some(d.start().await),
            (Decision::CallStop, Some(d)) => Some(d.stop().await),
            (Decision::CallProvision, Some(d)) => Some(d.provision().await),
            (Decision::CallUnprovision, Some(d)) => Some(d.unprovision().await),
            _ => None,
        };

        if let Some(Err(err)) = result {
            tracing::warn!(path = %path, error = %err, "driver call failed");
            next.restart_budget = next.restart_budget.saturating_sub(1);
            if next.restart_budget == 0 {
                let action = self.escalate(path);
                tracing::error!(path = %path, ?action, "restart budget exhausted, raising monitor_action");
                self.events.publish(EventRecord {
                    nodename: self.nodename.clone(),
                    kind: EventKind::Event,
                    ts: now,
                    data: serde_json::json!({"kind": "monitor_action", "path": path.to_string(), "action": format!("{action:?}")}),
                });
            }
            next.state = InstanceState::Err;
        }
        next
    }

    fn escalate(&self, _path: &ObjectPath) -> MonitorAction {
        MonitorAction::Reboot
    }

    #[must_use]
    pub fn instance_state(&self, path: &ObjectPath) -> Option<InstanceState> {
        self.objects.read().get(path).map(|m| m.state)
    }

    /// Every object path currently registered, for the daemon's tick loop
    /// to iterate without reaching into the orchestrator's internals.
    #[must_use]
    pub fn registered_paths(&self) -> Vec<ObjectPath> {
        self.objects.read().keys().cloned().collect()
    }
}

#[async_trait]
impl ManagedService for MonitorOrchestrator {
    fn name(&self) -> &'static str {
        "monitor"
    }

    async fn init(&self, _ctx: &ServiceContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn shutdown(&self, _terminate: bool) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str, score_hint: f64) -> Candidate {
        Candidate {
            nodename: name.to_string(),
            stats: crate::monitor::placement::NodeStats { load_15m: 1.0 / score_hint.max(0.01), mem_avail: 50.0, swap_avail: 50.0, frozen: false, avail_warn_or_err: false },
        }
    }

    #[test]
    fn leader_idle_enters_ready_on_started_expect() {
        let monitor = ObjectMonitor::new(3);
        let decision = decide_transition(&monitor, true, GlobalExpect::Started, 1000.0, false, false, false);
        assert_eq!(decision, Decision::EnterReady);
    }

    #[test]
    fn leader_ready_past_hold_starts() {
        let mut monitor = ObjectMonitor::new(3);
        monitor.state = InstanceState::Ready;
        monitor.ready_since = Some(1000.0);
        let decision = decide_transition(&monitor, true, GlobalExpect::Started, 1006.0, false, false, false);
        assert_eq!(decision, Decision::CallStart);
    }

    #[test]
    fn leader_ready_within_hold_waits() {
        let mut monitor = ObjectMonitor::new(3);
        monitor.state = InstanceState::Ready;
        monitor.ready_since = Some(1000.0);
        let decision = decide_transition(&monitor, true, GlobalExpect::Started, 1002.0, false, false, false);
        assert_eq!(decision, Decision::NoOp);
    }

    #[test]
    fn peer_already_starting_preempts_past_hold() {
        let mut monitor = ObjectMonitor::new(3);
        monitor.state = InstanceState::Ready;
        monitor.ready_since = Some(1000.0);
        let decision = decide_transition(&monitor, true, GlobalExpect::Started, 1006.0, false, false, true);
        assert_eq!(decision, Decision::NoOp);
    }

    #[test]
    fn non_leader_reconciles_down() {
        let mut monitor = ObjectMonitor::new(3);
        monitor.state = InstanceState::Started;
        let decision = decide_transition(&monitor, false, GlobalExpect::Started, 1000.0, false, false, false);
        assert_eq!(decision, Decision::CallStop);
    }

    #[test]
    fn rejoin_grace_suppresses_start() {
        let monitor = ObjectMonitor::new(3);
        let decision = decide_transition(&monitor, true, GlobalExpect::Started, 10.0, true, false, false);
        assert_eq!(decision, Decision::NoOp);
    }

    #[test]
    fn purge_without_unprovisioned_aborts() {
        let monitor = ObjectMonitor::new(3);
        let decision = decide_transition(&monitor, true, GlobalExpect::Purged, 0.0, false, false, false);
        assert!(matches!(decision, Decision::Abort(_)));
    }

    #[test]
    fn purge_after_unprovisioned_succeeds() {
        let mut monitor = ObjectMonitor::new(3);
        monitor.state = InstanceState::Stopped;
        let decision = decide_transition(&monitor, true, GlobalExpect::Purged, 0.0, false, false, false);
        assert_eq!(decision, Decision::Purge);
    }

    #[test]
    fn terminal_state_ignores_further_expects() {
        let mut monitor = ObjectMonitor::new(3);
        monitor.state = InstanceState::Purged;
        let decision = decide_transition(&monitor, true, GlobalExpect::Started, 0.0, false, false, false);
        assert_eq!(decision, Decision::NoOp);
    }

    #[test]
    fn flex_scale_up_when_below_minimum() {
        assert_eq!(flex_scale_decision(1, 3, 5), FlexDecision::ScaleUp);
    }

    #[test]
    fn flex_scale_down_when_above_maximum() {
        assert_eq!(flex_scale_decision(7, 3, 5), FlexDecision::ScaleDown);
    }

    #[test]
    fn flex_satisfied_within_bounds() {
        assert_eq!(flex_scale_decision(4, 3, 5), FlexDecision::Satisfied);
    }

    #[test]
    fn anti_affinity_filters_conflicting_node() {
        let candidates = vec![candidate("n1", 1.0), candidate("n2", 2.0)];
        let filtered = apply_anti_affinity(&candidates, &["n2".to_string()]);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].nodename, "n1");
    }

    #[tokio::test]
    async fn tick_rejects_when_quorum_lost() {
        let state = ClusterState::new("n1", EventBus::default());
        let orchestrator = MonitorOrchestrator::new("n1", state, EventBus::default(), 0.0);
        let path = ObjectPath { namespace: String::new(), kind: "svc".to_string(), name: "app1".to_string() };
        let result = orchestrator.tick(&path, &[], GlobalExpect::Started, 1000.0, false, false).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn tick_enters_ready_for_sole_leader() {
        let state = ClusterState::new("n1", EventBus::default());
        let orchestrator = MonitorOrchestrator::new("n1", state, EventBus::default(), 0.0);
        let path = ObjectPath { namespace: String::new(), kind: "svc".to_string(), name: "app1".to_string() };
        let candidates = vec![candidate("n1", 5.0)];
        let decision = orchestrator.tick(&path, &candidates, GlobalExpect::Started, 1000.0, true, false).await.unwrap();
        assert_eq!(decision, Decision::EnterReady);
        assert_eq!(orchestrator.instance_state(&path), Some(InstanceState::Ready));
    }

    #[tokio::test]
    async fn peer_already_starting_preempts_sole_leader_tick() {
        let state = ClusterState::new("n1", EventBus::default());
        let path = ObjectPath { namespace: String::new(), kind: "svc".to_string(), name: "app1".to_string() };
        let key = path.to_string().replace('/', "_");

        state.apply_heartbeat(
            "n2",
            &agent_core::wire::HeartbeatPayload {
                kind: agent_core::wire::HeartbeatKind::Full,
                gen: 1,
                updated: 999.0,
                compat: 1,
                monitor: agent_core::wire::HeartbeatBody::Full(serde_json::json!({"services": {key.clone(): {"instance_state": "Starting", "state_since": 999.0}}})),
            },
        );

        let orchestrator = MonitorOrchestrator::new("n1", state, EventBus::default(), 0.0);
        let candidates = vec![candidate("n1", 5.0), candidate("n2", 5.0)];
        orchestrator.tick(&path, &candidates, GlobalExpect::Started, 1000.0, true, false).await.unwrap();

        let decision = orchestrator.tick(&path, &candidates, GlobalExpect::Started, 1006.0, true, false).await.unwrap();
        assert_eq!(decision, Decision::NoOp);
        assert_eq!(orchestrator.instance_state(&path), Some(InstanceState::Ready));
    }
}
