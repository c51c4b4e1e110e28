//! Records operation duration and outcome as both a `tracing` span and a
//! `metrics` histogram/counter pair, so the daemon's Prometheus endpoint
//! and its logs agree on every call.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::operation::{Operation, OperationError, OperationResponse};

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S> Service<Operation> for MetricsService<S>
where
    S: Service<Operation, Response = OperationResponse, Error = OperationError> + Send,
    S::Future: Send + 'static,
{
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        let service_name = op.ctx().service_name;
        let call_id = op.ctx().call_id;

        let span = info_span!(
            "operation",
            service = service_name,
            call_id = call_id,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(op);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let duration_ms = start.elapsed().as_millis();
                let outcome = if result.is_ok() { "ok" } else { "error" };

                #[allow(clippy::cast_possible_truncation)]
                let duration_u64 = duration_ms as u64;
                tracing::Span::current().record("duration_ms", duration_u64);
                tracing::Span::current().record("outcome", outcome);

                metrics::histogram!("clusterd_operation_duration_ms", "service" => service_name, "outcome" => outcome)
                    .record(duration_u64 as f64);
                metrics::counter!("clusterd_operation_total", "service" => service_name, "outcome" => outcome).increment(1);

                tracing::info!(service = service_name, call_id, duration_ms = duration_u64, outcome, "operation complete");

                result
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::task::Poll;

    use tower::ServiceExt;

    use super::*;
    use crate::operation::OperationContext;

    struct ImmediateService;

    impl Service<Operation> for ImmediateService {
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

    #[tokio::test]
    async fn metrics_layer_passes_through_response() {
        let svc = MetricsLayer.layer(ImmediateService);
        let ctx = OperationContext::new(42, "cluster", 0.0, 5_000);
        let resp = svc.oneshot(Operation::GetNodeStatus { ctx }).await.unwrap();
        assert!(matches!(resp, OperationResponse::Ack { call_id: 42 }));
    }
}
