//! Assembles the full middleware stack around a router: shed load first,
//! enforce the per-call timeout next, record metrics last (closest to the
//! actual handler, so timed-out and shed calls don't skew the histogram).

use tower::ServiceBuilder;

use super::{LoadShedLayer, MetricsLayer, TimeoutLayer};
use crate::operation::{Operation, OperationError, OperationResponse};

/// Wraps `router` with load shedding, timeout enforcement, and metrics.
pub fn build_operation_pipeline<S>(router: S, max_concurrent_operations: usize) -> impl tower::Service<Operation, Response = OperationResponse, Error = OperationError, Future = impl Send> + Clone
where
    S: tower::Service<Operation, Response = OperationResponse, Error = OperationError> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    ServiceBuilder::new()
        .layer(LoadShedLayer::new(max_concurrent_operations))
        .layer(TimeoutLayer)
        .layer(MetricsLayer)
        .service(router)
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use tower::ServiceExt;

    use super::*;
    use crate::operation::OperationContext;

    #[derive(Clone)]
    struct StubRouter;

    impl tower::Service<Operation> for StubRouter {
        type Response = OperationResponse;
        type Error = OperationError;
        type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, op: Operation) -> Self::Future {
            let call_id = op.ctx().call_id;
            Box::pin(async move { Ok(OperationResponse::Ack { call_id }) })
        }
    }

    fn op(call_id: u64) -> Operation {
        Operation::GetNodeStatus { ctx: OperationContext::new(call_id, "cluster", 0.0, 5_000) }
    }

    #[tokio::test]
    async fn pipeline_passes_through_successful_call() {
        let pipeline = build_operation_pipeline(StubRouter, 8);
        let resp = pipeline.oneshot(op(7)).await.unwrap();
        assert!(matches!(resp, OperationResponse::Ack { call_id: 7 }));
    }
}
