//! Heartbeat fabric: pluggable transport drivers (C4), the deadline-based
//! beating/stale peer verdict plus its optional phi-accrual refinement,
//! and the supervisor (C5) tying them to cluster state and the event bus.

pub mod drivers;
pub mod peer;
pub mod supervisor;
pub mod suspicion;

pub use peer::{PeerTracker, PeerVerdict};
pub use supervisor::HeartbeatSupervisor;
pub use suspicion::{PhiAccrualConfig, SuspicionTracker};
