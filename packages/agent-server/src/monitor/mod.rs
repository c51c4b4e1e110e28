//! Monitor/orchestrator (C9, §4.9): per-object instance FSM, placement
//! leadership, and the tick loop that drives both from cluster state and
//! `global_expect`.

pub mod driver;
pub mod fsm;
pub mod orchestrator;
pub mod placement;

pub use driver::{MonitorAction, ResourceDriver};
pub use fsm::{InstanceState, ObjectMonitor};
pub use orchestrator::{decide_transition, flex_scale_decision, Decision, FlexDecision, MonitorOrchestrator};
pub use placement::{compute_score, placement_leader, Candidate, NodeStats};
