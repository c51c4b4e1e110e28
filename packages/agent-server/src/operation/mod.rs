//! Typed operation dispatch for everything the listener (C8) accepts:
//! config reads/writes, status queries, orchestration commands, and the
//! arbitrator's quorum ping. Every inbound `wire::Request` is classified
//! into an `Operation` before it enters the middleware pipeline, mirroring
//! how the teacher's service layer classifies a `Message` into an
//! `Operation` ahead of its own pipeline.

pub mod middleware;

use agent_core::{ConfigError, GlobalExpect, NodeName, ObjectPath, UsageError};
use serde_json::Value as Json;

/// Who is allowed to invoke an operation without further authorization
/// checks at the listener boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerOrigin {
    /// A client connecting over the listener's TCP port.
    Client,
    /// A cluster peer relaying a heartbeat-carried request.
    Peer,
    /// The arbitrator HTTP relay.
    Arbitrator,
    /// Generated internally by the scheduler or monitor loop.
    System,
}

/// Context threaded through the middleware pipeline with every operation.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub call_id: u64,
    pub service_name: &'static str,
    pub caller_origin: CallerOrigin,
    pub caller_node: Option<NodeName>,
    pub timestamp: f64,
    pub call_timeout_ms: u64,
}

impl OperationContext {
    #[must_use]
    pub fn new(call_id: u64, service_name: &'static str, timestamp: f64, call_timeout_ms: u64) -> Self {
        Self { call_id, service_name, caller_origin: CallerOrigin::Client, caller_node: None, timestamp, call_timeout_ms }
    }
}

/// Service-name constants used to tag operations for metrics and tracing,
/// one per listener domain (§4.8 handler registry).
pub mod service_names {
    pub const CONFIG: &str = "config";
    pub const CLUSTER: &str = "cluster";
    pub const ORCHESTRATION: &str = "orchestration";
    pub const QUORUM: &str = "quorum";
}

/// Typed operation variants dispatched through the pipeline. Constructed by
/// the listener's request router from a decoded `wire::Request`.
#[derive(Debug)]
#[non_exhaustive]
pub enum Operation {
    GetNodeStatus { ctx: OperationContext },
    GetClusterStatus { ctx: OperationContext },
    ConfigGet { ctx: OperationContext, path: ObjectPath, section: String, key: String, impersonate: Option<NodeName> },
    ConfigSetMulti { ctx: OperationContext, path: ObjectPath, changes: Vec<agent_core::Change> },
    SetGlobalExpect { ctx: OperationContext, path: Option<ObjectPath>, expect: GlobalExpect, target_node: Option<NodeName> },
    NodeFreeze { ctx: OperationContext },
    NodeThaw { ctx: OperationContext },
    /// Arbitrator quorum-status ping (§4.10, action name `daemon_blacklist_status`).
    DaemonBlacklistStatus { ctx: OperationContext },
}

impl Operation {
    #[must_use]
    pub fn ctx(&self) -> &OperationContext {
        match self {
            Operation::GetNodeStatus { ctx }
            | Operation::GetClusterStatus { ctx }
            | Operation::ConfigGet { ctx, .. }
            | Operation::ConfigSetMulti { ctx, .. }
            | Operation::SetGlobalExpect { ctx, .. }
            | Operation::NodeFreeze { ctx }
            | Operation::NodeThaw { ctx }
            | Operation::DaemonBlacklistStatus { ctx } => ctx,
        }
    }
}

/// Successful response from an operation handler.
#[derive(Debug, Clone)]
pub enum OperationResponse {
    Ack { call_id: u64 },
    Json(Json),
    Empty,
}

/// Errors returned by operation handlers, mapped onto `wire::Response`'s
/// `status`/`error` fields by the listener.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("unknown action: {0}")]
    UnknownAction(String),
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("daemon overloaded, try again later")]
    Overloaded,
    #[error(transparent)]
    Usage(#[from] UsageError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Classifies a decoded `wire::Request` into a typed `Operation`, assigning
/// a fresh call id and the default per-operation timeout.
pub struct OperationClassifier {
    call_id_counter: std::sync::atomic::AtomicU64,
    default_timeout_ms: u64,
}

impl OperationClassifier {
    #[must_use]
    pub fn new(default_timeout_ms: u64) -> Self {
        Self { call_id_counter: std::sync::atomic::AtomicU64::new(1), default_timeout_ms }
    }

    fn next_call_id(&self) -> u64 {
        self.call_id_counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }

    /// # Errors
    /// Returns `OperationError::UnknownAction` if `request.action` does not
    /// name a known listener action.
    pub fn classify(&self, request: &agent_core::Request, now: f64, caller_origin: CallerOrigin) -> Result<Operation, OperationError> {
        let call_id = self.next_call_id();
        let mk_ctx = |service_name| {
            let mut ctx = OperationContext::new(call_id, service_name, now, self.default_timeout_ms);
            ctx.caller_origin = caller_origin;
            ctx
        };

        match request.action.as_str() {
            "get_node_status" => Ok(Operation::GetNodeStatus { ctx: mk_ctx(service_names::CLUSTER) }),
            "get_cluster_status" => Ok(Operation::GetClusterStatus { ctx: mk_ctx(service_names::CLUSTER) }),
            "daemon_blacklist_status" => Ok(Operation::DaemonBlacklistStatus { ctx: mk_ctx(service_names::QUORUM) }),
            "node_freeze" => Ok(Operation::NodeFreeze { ctx: mk_ctx(service_names::ORCHESTRATION) }),
            "node_thaw" => Ok(Operation::NodeThaw { ctx: mk_ctx(service_names::ORCHESTRATION) }),
            "config_get" => {
                let path = parse_path(&request.options)?;
                let section = field_str(&request.options, "section")?;
                let key = field_str(&request.options, "key")?;
                let impersonate = request.options.get("impersonate").and_then(Json::as_str).map(NodeName::from);
                Ok(Operation::ConfigGet { ctx: mk_ctx(service_names::CONFIG), path, section, key, impersonate })
            }
            "config_set_multi" => {
                let path = parse_path(&request.options)?;
                let changes = parse_changes(&request.options)?;
                Ok(Operation::ConfigSetMulti { ctx: mk_ctx(service_names::CONFIG), path, changes })
            }
            "set_global_expect" => {
                let path = request.options.get("path").and_then(Json::as_str).map(ObjectPath::parse).transpose()?;
                let raw = field_str(&request.options, "global_expect")?;
                let (expect, target_node) = GlobalExpect::parse(&raw).ok_or_else(|| UsageError::BadParameter {
                    name: "global_expect".into(),
                    value: raw.clone(),
                    expected: "a known global_expect literal".into(),
                })?;
                Ok(Operation::SetGlobalExpect { ctx: mk_ctx(service_names::ORCHESTRATION), path, expect, target_node: target_node.map(NodeName::from) })
            }
            other => Err(OperationError::UnknownAction(other.to_string())),
        }
    }
}

fn field_str(options: &Json, field: &'static str) -> Result<String, UsageError> {
    options.get(field).and_then(Json::as_str).map(ToString::to_string).ok_or_else(|| UsageError::MissingParameter(field.to_string()))
}

fn parse_path(options: &Json) -> Result<ObjectPath, OperationError> {
    let raw = field_str(options, "path")?;
    ObjectPath::parse(&raw).map_err(OperationError::from)
}

fn parse_changes(options: &Json) -> Result<Vec<agent_core::Change>, OperationError> {
    let raw = options
        .get("changes")
        .and_then(Json::as_array)
        .ok_or_else(|| UsageError::MissingParameter("changes".to_string()))?;
    raw.iter()
        .map(|entry| {
            let section = entry.get("section").and_then(Json::as_str).ok_or_else(|| UsageError::MissingParameter("changes[].section".to_string()))?.to_string();
            let key = entry.get("key").and_then(Json::as_str).ok_or_else(|| UsageError::MissingParameter("changes[].key".to_string()))?.to_string();
            let scope = entry.get("scope").and_then(Json::as_str).map(ToString::to_string);
            let value = entry.get("value").and_then(Json::as_str).map(ToString::to_string);
            Ok(agent_core::Change { section, key, scope, value })
        })
        .collect::<Result<Vec<_>, UsageError>>()
        .map_err(OperationError::from)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn request(action: &str, options: Json) -> agent_core::Request {
        agent_core::Request { action: action.to_string(), options, node: None }
    }

    #[test]
    fn classifies_status_query() {
        let classifier = OperationClassifier::new(5_000);
        let op = classifier.classify(&request("get_cluster_status", json!({})), 0.0, CallerOrigin::Client).unwrap();
        assert_eq!(op.ctx().service_name, service_names::CLUSTER);
    }

    #[test]
    fn classifies_config_get() {
        let classifier = OperationClassifier::new(5_000);
        let req = request("config_get", json!({"path": "svc/app1", "section": "DEFAULT", "key": "nodes"}));
        let op = classifier.classify(&req, 0.0, CallerOrigin::Client).unwrap();
        assert!(matches!(op, Operation::ConfigGet { .. }));
    }

    #[test]
    fn unknown_action_rejected() {
        let classifier = OperationClassifier::new(5_000);
        let err = classifier.classify(&request("bogus_action", json!({})), 0.0, CallerOrigin::Client).unwrap_err();
        assert!(matches!(err, OperationError::UnknownAction(_)));
    }

    #[test]
    fn set_global_expect_parses_placed_at_node() {
        let classifier = OperationClassifier::new(5_000);
        let req = request("set_global_expect", json!({"path": "svc/app1", "global_expect": "placed@node2"}));
        let op = classifier.classify(&req, 0.0, CallerOrigin::Client).unwrap();
        match op {
            Operation::SetGlobalExpect { expect, target_node, .. } => {
                assert!(matches!(expect, GlobalExpect::Placed));
                assert_eq!(target_node.unwrap().as_str(), "node2");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn daemon_blacklist_status_routes_to_quorum() {
        let classifier = OperationClassifier::new(5_000);
        let op = classifier.classify(&request("daemon_blacklist_status", json!({})), 0.0, CallerOrigin::Arbitrator).unwrap();
        assert_eq!(op.ctx().service_name, service_names::QUORUM);
    }
}
