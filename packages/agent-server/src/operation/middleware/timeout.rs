//! Per-operation timeout enforcement, reading the deadline carried in each
//! operation's own context (`call_timeout_ms`) rather than a single
//! pipeline-wide constant.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tower::{Layer, Service};

use crate::operation::{Operation, OperationError, OperationResponse};

#[derive(Debug, Clone, Copy, Default)]
pub struct TimeoutLayer;

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
}

impl<S> Service<Operation> for TimeoutService<S>
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
        let timeout_ms = op.ctx().call_timeout_ms;
        let fut = self.inner.call(op);
        Box::pin(async move {
            match tokio::time::timeout(std::time::Duration::from_millis(timeout_ms), fut).await {
                Ok(result) => result,
                Err(_) => Err(OperationError::Timeout { timeout_ms }),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::task::Poll;

    use tower::ServiceExt;

    use super::*;
    use crate::operation::OperationContext;

    struct DelayedService {
        delay_ms: u64,
    }

    impl Service<Operation> for DelayedService {
        type Response = OperationResponse;
        type Error = OperationError;
        type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, op: Operation) -> Self::Future {
            let call_id = op.ctx().call_id;
            let delay_ms = self.delay_ms;
            Box::pin(async move {
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                Ok(OperationResponse::Ack { call_id })
            })
        }
    }

    fn op(call_id: u64, timeout_ms: u64) -> Operation {
        Operation::GetNodeStatus { ctx: OperationContext::new(call_id, "cluster", 0.0, timeout_ms) }
    }

    #[tokio::test]
    async fn completes_within_timeout() {
        let svc = TimeoutLayer.layer(DelayedService { delay_ms: 5 });
        let resp = svc.oneshot(op(1, 200)).await.unwrap();
        assert!(matches!(resp, OperationResponse::Ack { call_id: 1 }));
    }

    #[tokio::test]
    async fn exceeds_timeout_returns_error() {
        let svc = TimeoutLayer.layer(DelayedService { delay_ms: 200 });
        let err = svc.oneshot(op(1, 10)).await.unwrap_err();
        assert!(matches!(err, OperationError::Timeout { timeout_ms: 10 }));
    }
}
