//! Resource driver trait (§4.9 failure semantics): the orchestrator's
//! external collaborator boundary, generalized from the same
//! async-trait-over-`Arc`-of-trait-object pattern the heartbeat fabric
//! uses for its transports (`heartbeat::drivers::HbDriver`).

use agent_core::DriverError;
use async_trait::async_trait;

/// An external resource the orchestrator starts, stops, (un)provisions,
/// or purges on the FSM's behalf. Concrete implementations are outside
/// this crate's scope -- the spec treats them as collaborators (§4.9).
#[async_trait]
pub trait ResourceDriver: Send + Sync {
    fn rid(&self) -> &str;
    async fn start(&self) -> Result<(), DriverError>;
    async fn stop(&self) -> Result<(), DriverError>;
    async fn provision(&self) -> Result<(), DriverError>;
    async fn unprovision(&self) -> Result<(), DriverError>;
}

/// The escalation raised when a resource's `restart` budget is exhausted
/// while `monitor=true` is set on it (§4.9 failure semantics).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorAction {
    Reboot,
    Crash,
    Freezestop,
}
