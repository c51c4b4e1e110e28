//! Dispatches a classified `Operation` to the subsystem it targets (cluster
//! state, the per-object config engine, or the node freeze flag),
//! generalizing the teacher's `OperationRouter` (`service::router`) --
//! which dispatches by `service_name` to one of several *registered*
//! domain services -- down to a single `tower::Service<Operation>` since
//! this daemon's handful of actions share one backing state set rather
//! than seven independent domains.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use agent_core::wire::{EventKind, EventRecord};
use tower::Service;

use crate::cluster_state::ClusterState;
use crate::eventbus::EventBus;
use crate::listener::config_store::ObjectConfigStore;
use crate::operation::{Operation, OperationError, OperationResponse};

type BoxFuture = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

/// Tracks whether this node is frozen (`node_freeze`/`node_thaw`),
/// consulted by the monitor's placement-eligibility check (§4.9 rule 4).
#[derive(Clone, Default)]
pub struct NodeFreezeFlag(Arc<AtomicBool>);

impl NodeFreezeFlag {
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, frozen: bool) {
        self.0.store(frozen, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct RequestRouter {
    nodename: String,
    cluster_state: Arc<ClusterState>,
    config_store: Arc<ObjectConfigStore>,
    events: EventBus,
    freeze: NodeFreezeFlag,
}

impl RequestRouter {
    #[must_use]
    pub fn new(nodename: String, cluster_state: Arc<ClusterState>, config_store: Arc<ObjectConfigStore>, events: EventBus, freeze: NodeFreezeFlag) -> Self {
        Self { nodename, cluster_state, config_store, events, freeze }
    }
}

impl Service<Operation> for RequestRouter {
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = BoxFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { this.dispatch(op).await })
    }
}

impl RequestRouter {
    async fn dispatch(&self, op: Operation) -> Result<OperationResponse, OperationError> {
        match op {
            Operation::GetNodeStatus { .. } => {
                let snapshot = self.cluster_state.snapshot();
                Ok(OperationResponse::Json(snapshot.get(self.nodename.as_str()).cloned().unwrap_or(serde_json::json!({}))))
            }
            Operation::GetClusterStatus { .. } => Ok(OperationResponse::Json(self.cluster_state.snapshot())),
            Operation::ConfigGet { path, section, key, impersonate, .. } => {
                let engine = self.config_store.get_or_load(&path)?;
                let value = engine.get(&section, &key, impersonate.as_ref().map(agent_core::NodeName::as_str), true)?;
                Ok(OperationResponse::Json(serde_json::to_value(value).unwrap_or(serde_json::Value::Null)))
            }
            Operation::ConfigSetMulti { path, changes, ctx } => {
                let engine = self.config_store.get_or_load(&path)?;
                engine.set_multi(changes)?;
                Ok(OperationResponse::Ack { call_id: ctx.call_id })
            }
            Operation::SetGlobalExpect { ctx, path, expect, target_node } => {
                let now = ctx.timestamp;
                let record = serde_json::json!({
                    "expect": format!("{expect:?}"),
                    "target_node": target_node.as_ref().map(agent_core::NodeName::as_str),
                    "ts": now,
                    "set_by": self.nodename,
                });
                match &path {
                    Some(p) => {
                        let key = p.to_string().replace('/', "_");
                        self.cluster_state.update_local(&["services", &key, "global_expect"], record, now);
                    }
                    None => self.cluster_state.update_local(&["global_expect"], record, now),
                }
                self.events.publish(EventRecord {
                    nodename: self.nodename.clone(),
                    kind: EventKind::Event,
                    ts: now,
                    data: serde_json::json!({"kind": "global_expect_set", "path": path.map(|p| p.to_string()), "expect": format!("{expect:?}")}),
                });
                Ok(OperationResponse::Ack { call_id: ctx.call_id })
            }
            Operation::NodeFreeze { ctx } => {
                self.freeze.set(true);
                self.events.publish(EventRecord { nodename: self.nodename.clone(), kind: EventKind::Event, ts: ctx.timestamp, data: serde_json::json!({"kind": "node_frozen"}) });
                Ok(OperationResponse::Ack { call_id: ctx.call_id })
            }
            Operation::NodeThaw { ctx } => {
                self.freeze.set(false);
                self.events.publish(EventRecord { nodename: self.nodename.clone(), kind: EventKind::Event, ts: ctx.timestamp, data: serde_json::json!({"kind": "node_thawed"}) });
                Ok(OperationResponse::Ack { call_id: ctx.call_id })
            }
            Operation::DaemonBlacklistStatus { ctx } => Ok(OperationResponse::Ack { call_id: ctx.call_id }),
        }
    }
}
