//! Cluster state store (C6, §4.6): the `monitor.nodes.<nodename>.*` /
//! `monitor.services.<path>.*` tree every node keeps a full replica of,
//! updated either locally (by the monitor loop) or from peer heartbeats
//! (full snapshots or ordered JSON-delta patches).

use std::sync::Arc;

use agent_core::wire::{EventKind, EventRecord, HeartbeatBody, HeartbeatPayload, Patch, PatchOp};
use parking_lot::RwLock;
use serde_json::Value as Json;

use crate::eventbus::EventBus;

/// Outcome of applying an incoming heartbeat payload to a peer's branch of
/// the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// `gen` was stale (`<=` what's stored); the payload was discarded.
    Stale,
    /// `gen` skipped ahead of what patches can bridge; a full resend must
    /// be requested from the peer.
    GapDetected,
}

struct PeerBranch {
    gen: u64,
    updated: f64,
    tree: Json,
}

/// The full cluster state tree, one branch per known node, guarded by a
/// single `RwLock` (reads are frequent and cheap; writes -- heartbeat
/// application and local updates -- are comparatively rare). Owns a handle
/// to the event bus so local mutations can publish their own patch as they
/// happen (§4.6 step 4), independent of the heartbeat broadcast cadence.
pub struct ClusterState {
    inner: RwLock<Inner>,
    events: EventBus,
}

struct Inner {
    nodename: String,
    peers: std::collections::HashMap<String, PeerBranch>,
    /// Patch ops accumulated by `update_local` since the last
    /// `drain_local_patches`, for the heartbeat supervisor to ship as a
    /// `HeartbeatBody::Deltas` between full resyncs.
    pending_patch: Patch,
}

impl ClusterState {
    #[must_use]
    pub fn new(nodename: impl Into<String>, events: EventBus) -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(Inner { nodename: nodename.into(), peers: std::collections::HashMap::new(), pending_patch: Vec::new() }),
            events,
        })
    }

    /// Writes `value` into this node's own branch at `path` (a sequence of
    /// object keys under the node's root, e.g. `&["services", svc,
    /// "instance_state"]`), bumping the generation and recording a patch op
    /// for the next heartbeat broadcast. An empty `path` is a no-op: every
    /// write is already scoped under this node's own branch, so there is no
    /// way to target outside `monitor.nodes.<self>` through this call.
    pub fn update_local(&self, path: &[&str], value: Json, now: f64) {
        if path.is_empty() {
            return;
        }
        let json_path: Vec<Json> = path.iter().map(|p| Json::String((*p).to_string())).collect();

        let mut inner = self.inner.write();
        let nodename = inner.nodename.clone();
        let gen = inner.peers.get(&nodename).map_or(1, |b| b.gen + 1);
        let branch = inner.peers.entry(nodename.clone()).or_insert_with(|| PeerBranch { gen, updated: now, tree: Json::Object(serde_json::Map::new()) });
        set_at_path(&mut branch.tree, &json_path, value.clone());
        branch.gen = gen;
        branch.updated = now;
        inner.pending_patch.push(PatchOp::Set { path: json_path.clone(), value: value.clone() });
        drop(inner);

        self.events.publish(EventRecord {
            nodename,
            kind: EventKind::Patch,
            ts: now,
            data: serde_json::to_value(vec![PatchOp::Set { path: json_path, value }]).unwrap_or(Json::Null),
        });
    }

    /// Drains and returns every patch op accumulated by `update_local`
    /// since the last call, for the heartbeat supervisor to ship as a
    /// `HeartbeatBody::Deltas` between full resyncs.
    pub fn drain_local_patches(&self) -> Patch {
        std::mem::take(&mut self.inner.write().pending_patch)
    }

    /// Tombstones a peer's branch on the beating-to-stale edge (§4.5): the
    /// node stays listed so its absence doesn't vanish from the tree, but
    /// its services are cleared and `monitor.status` is set to `unknown`.
    /// Does not bump `gen` -- this is a local supervisory marker, not a
    /// remotely-sourced update.
    pub fn forget_peer(&self, peer: &str, now: f64) {
        let mut inner = self.inner.write();
        let Some(branch) = inner.peers.get_mut(peer) else {
            return;
        };
        if !branch.tree.is_object() {
            branch.tree = Json::Object(serde_json::Map::new());
        }
        let map = branch.tree.as_object_mut().expect("coerced to object above");
        map.insert("services".to_string(), Json::Object(serde_json::Map::new()));
        let monitor = map.entry("monitor").or_insert_with(|| Json::Object(serde_json::Map::new()));
        if !monitor.is_object() {
            *monitor = Json::Object(serde_json::Map::new());
        }
        monitor.as_object_mut().expect("coerced to object above").insert("status".to_string(), Json::String("unknown".to_string()));
        branch.updated = now;
    }

    /// Applies an incoming heartbeat payload from `peer`, honoring the
    /// gen-based rules: discard stale generations, apply patches only when
    /// contiguous, request a full resend on a detected gap.
    pub fn apply_heartbeat(&self, peer: &str, payload: &HeartbeatPayload) -> ApplyOutcome {
        let mut inner = self.inner.write();
        let stored_gen = inner.peers.get(peer).map_or(0, |b| b.gen);

        if payload.gen <= stored_gen && stored_gen != 0 {
            return ApplyOutcome::Stale;
        }

        match &payload.monitor {
            HeartbeatBody::Full(tree) => {
                inner.peers.insert(peer.to_string(), PeerBranch { gen: payload.gen, updated: payload.updated, tree: tree.clone() });
                ApplyOutcome::Applied
            }
            HeartbeatBody::Deltas(patch) => {
                if stored_gen != 0 && payload.gen > stored_gen + 1 {
                    return ApplyOutcome::GapDetected;
                }
                let Some(branch) = inner.peers.get_mut(peer) else {
                    return ApplyOutcome::GapDetected;
                };
                apply_patch(&mut branch.tree, patch);
                branch.gen = payload.gen;
                branch.updated = payload.updated;
                ApplyOutcome::Applied
            }
        }
    }

    /// Returns a deep-cloned snapshot of the whole tree, suitable for a
    /// listener response or a full-resend heartbeat.
    #[must_use]
    pub fn snapshot(&self) -> Json {
        let inner = self.inner.read();
        let mut nodes = serde_json::Map::new();
        for (name, branch) in &inner.peers {
            nodes.insert(name.clone(), branch.tree.clone());
        }
        Json::Object(nodes)
    }

    /// Returns this node's own branch, the shape a full-resend heartbeat
    /// sends.
    #[must_use]
    pub fn own_tree(&self) -> Json {
        let inner = self.inner.read();
        inner.peers.get(&inner.nodename).map_or(Json::Object(serde_json::Map::new()), |b| b.tree.clone())
    }

    #[must_use]
    pub fn peer_gen(&self, peer: &str) -> u64 {
        self.inner.read().peers.get(peer).map_or(0, |b| b.gen)
    }
}

fn apply_patch(tree: &mut Json, patch: &Patch) {
    for op in patch {
        match op {
            PatchOp::Set { path, value } => set_at_path(tree, path, value.clone()),
            PatchOp::Delete { path } => delete_at_path(tree, path),
        }
    }
}

fn set_at_path(tree: &mut Json, path: &[Json], value: Json) {
    let Some((last, prefix)) = path.split_last() else { return };
    let parent = navigate_mut(tree, prefix);
    if let Some(Json::Object(map)) = parent {
        if let Some(key) = last.as_str() {
            map.insert(key.to_string(), value);
        }
    }
}

fn delete_at_path(tree: &mut Json, path: &[Json]) {
    let Some((last, prefix)) = path.split_last() else { return };
    let parent = navigate_mut(tree, prefix);
    if let Some(Json::Object(map)) = parent {
        if let Some(key) = last.as_str() {
            map.remove(key);
        }
    }
}

fn navigate_mut<'a>(tree: &'a mut Json, path: &[Json]) -> Option<&'a mut Json> {
    let mut cur = tree;
    for segment in path {
        let key = segment.as_str()?;
        if !cur.is_object() {
            *cur = Json::Object(serde_json::Map::new());
        }
        let map = cur.as_object_mut()?;
        cur = map.entry(key).or_insert_with(|| Json::Object(serde_json::Map::new()));
    }
    Some(cur)
}
