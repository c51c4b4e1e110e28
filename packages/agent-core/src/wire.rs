//! Wire protocol types carried inside the crypt envelope (§6).

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// A listener/RPC request (§4.8, §6): `{ "action": str, "options": {...},
/// "node": optional }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub action: String,
    #[serde(default)]
    pub options: Json,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
}

/// A listener/RPC response: `status` 0 success, non-zero error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub status: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Json>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
}

impl Response {
    #[must_use]
    pub fn ok(data: Json) -> Self {
        Self { status: 0, data: Some(data), error: None, traceback: None, info: None }
    }

    #[must_use]
    pub fn err(status: i32, error: impl Into<String>) -> Self {
        Self { status, data: None, error: Some(error.into()), traceback: None, info: None }
    }
}

/// One JSON-delta patch step: on the wire, a 2-element array `[path,
/// value]` to set, or a 1-element array `[path]` to delete, where `path`
/// is itself an array of map-key/array-index segments. The outer array's
/// length (not its contents' shape) is what discriminates the two cases,
/// so this needs a hand-written codec rather than `#[serde(untagged)]`.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchOp {
    Set { path: Vec<Json>, value: Json },
    Delete { path: Vec<Json> },
}

impl PatchOp {
    #[must_use]
    pub fn set(path: Vec<&str>, value: Json) -> Self {
        Self::Set { path: path.into_iter().map(|p| Json::String(p.to_string())).collect(), value }
    }

    #[must_use]
    pub fn delete(path: Vec<&str>) -> Self {
        Self::Delete { path: path.into_iter().map(|p| Json::String(p.to_string())).collect() }
    }

    #[must_use]
    pub fn path(&self) -> &[Json] {
        match self {
            PatchOp::Set { path, .. } | PatchOp::Delete { path } => path,
        }
    }
}

impl Serialize for PatchOp {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeSeq;
        match self {
            PatchOp::Set { path, value } => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element(path)?;
                seq.serialize_element(value)?;
                seq.end()
            }
            PatchOp::Delete { path } => {
                let mut seq = serializer.serialize_seq(Some(1))?;
                seq.serialize_element(path)?;
                seq.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for PatchOp {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut outer: Vec<Json> = Deserialize::deserialize(deserializer)?;
        match outer.len() {
            1 => {
                let path = outer.pop().unwrap();
                let path = path.as_array().cloned().ok_or_else(|| serde::de::Error::custom("patch path must be an array"))?;
                Ok(PatchOp::Delete { path })
            }
            2 => {
                let value = outer.pop().unwrap();
                let path = outer.pop().unwrap();
                let path = path.as_array().cloned().ok_or_else(|| serde::de::Error::custom("patch path must be an array"))?;
                Ok(PatchOp::Set { path, value })
            }
            n => Err(serde::de::Error::custom(format!("patch op must have 1 or 2 elements, got {n}"))),
        }
    }
}

/// An ordered list of patch steps; order is significant (§4.6).
pub type Patch = Vec<PatchOp>;

/// Heartbeat payload kind: a full snapshot, or an incremental patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatKind {
    Full,
    Patch,
}

/// Heartbeat payload schema (§6), carried inside the crypt envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub kind: HeartbeatKind,
    pub gen: u64,
    pub updated: f64,
    pub compat: u32,
    /// Full monitor tree for `kind=full`, ordered deltas for `kind=patch`.
    pub monitor: HeartbeatBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeartbeatBody {
    Full(Json),
    Deltas(Patch),
}

/// A streamed event or patch record (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub nodename: String,
    pub kind: EventKind,
    pub ts: f64,
    pub data: Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Event,
    Patch,
}

/// Global-expect target labels (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlobalExpect {
    Started,
    Stopped,
    Frozen,
    Thawed,
    Provisioned,
    Unprovisioned,
    Purged,
    Deleted,
    Placed,
    Aborted,
}

impl GlobalExpect {
    /// Parses `placed` and `placed@<node>` (the one variant carrying data).
    #[must_use]
    pub fn parse(raw: &str) -> Option<(Self, Option<String>)> {
        if let Some(node) = raw.strip_prefix("placed@") {
            return Some((Self::Placed, Some(node.to_string())));
        }
        let ge = match raw {
            "started" => Self::Started,
            "stopped" => Self::Stopped,
            "frozen" => Self::Frozen,
            "thawed" => Self::Thawed,
            "provisioned" => Self::Provisioned,
            "unprovisioned" => Self::Unprovisioned,
            "purged" => Self::Purged,
            "deleted" => Self::Deleted,
            "placed" => Self::Placed,
            "aborted" => Self::Aborted,
            _ => return None,
        };
        Some((ge, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trip() {
        let req = Request { action: "status".into(), options: serde_json::json!({"path": "root/svc/web"}), node: None };
        let bytes = serde_json::to_vec(&req).unwrap();
        let decoded: Request = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded.action, "status");
    }

    #[test]
    fn patch_op_set_and_delete_round_trip() {
        let ops = vec![
            PatchOp::set(vec!["monitor", "nodes", "n1", "monitor", "status"], serde_json::json!("up")),
            PatchOp::delete(vec!["monitor", "services", "root/svc/web"]),
        ];
        let bytes = serde_json::to_vec(&ops).unwrap();
        let decoded: Vec<PatchOp> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(ops, decoded);
    }

    #[test]
    fn global_expect_placed_at_node() {
        let (ge, node) = GlobalExpect::parse("placed@n2").unwrap();
        assert_eq!(ge, GlobalExpect::Placed);
        assert_eq!(node.as_deref(), Some("n2"));
    }

    #[test]
    fn global_expect_rejects_unknown() {
        assert!(GlobalExpect::parse("bogus").is_none());
    }
}
