//! Process-lifetime plumbing: the service registry and the shutdown
//! controller every subsystem is wired through.

pub mod registry;
pub mod shutdown;

pub use registry::{ManagedService, ServiceContext, ServiceRegistry};
pub use shutdown::{HealthState, InFlightGuard, ShutdownController};
