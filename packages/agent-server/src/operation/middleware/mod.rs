//! Tower middleware stack wrapped around the operation router: load
//! shedding, per-call timeouts, and metrics/tracing instrumentation, in
//! that order from the caller's perspective.

pub mod load_shed;
pub mod metrics;
pub mod pipeline;
pub mod timeout;

pub use load_shed::LoadShedLayer;
pub use metrics::MetricsLayer;
pub use pipeline::build_operation_pipeline;
pub use timeout::TimeoutLayer;
