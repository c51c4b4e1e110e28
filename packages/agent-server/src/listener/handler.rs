//! Per-connection accept loop (C8, §4.8): decodes length-delimited frames
//! into `wire::Request`, classifies and routes each through the operation
//! pipeline, and re-encodes the result as a `wire::Response` frame --
//! generalized from the teacher's per-connection task in
//! `network::module::NetworkModule::serve`, down to request/response
//! framing instead of a WebSocket upgrade.

use std::sync::Arc;

use agent_core::wire::{Request, Response};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tower::{Service, ServiceExt};

use crate::listener::connection::{ConnectionKind, ConnectionRegistry};
use crate::operation::{CallerOrigin, OperationClassifier, OperationError, OperationResponse};
use crate::runtime::ShutdownController;

/// Maps a classified-operation error onto the wire response's integer
/// status (§7: 1 handled error, 2 usage error).
fn error_status(err: &OperationError) -> i32 {
    match err {
        OperationError::UnknownAction(_) | OperationError::Usage(_) => 2,
        OperationError::Timeout { .. } | OperationError::Overloaded | OperationError::Config(_) | OperationError::Internal(_) => 1,
    }
}

fn response_for(result: Result<OperationResponse, OperationError>) -> Response {
    match result {
        Ok(OperationResponse::Ack { call_id }) => Response::ok(serde_json::json!({"call_id": call_id})),
        Ok(OperationResponse::Json(data)) => Response::ok(data),
        Ok(OperationResponse::Empty) => Response::ok(serde_json::Value::Null),
        Err(err) => Response::err(error_status(&err), err.to_string()),
    }
}

/// Drives one accepted TCP connection until it closes or shutdown fires,
/// decoding/encoding frames and routing each through `pipeline`.
///
/// `now` supplies the wall-clock timestamp stamped onto each operation's
/// context; the daemon passes a closure reading `SystemTime::now()`.
pub async fn handle_connection<S, F>(
    stream: TcpStream,
    kind: ConnectionKind,
    classifier: Arc<OperationClassifier>,
    mut pipeline: S,
    registry: Arc<ConnectionRegistry>,
    shutdown: &ShutdownController,
    now: F,
) where
    S: Service<crate::operation::Operation, Response = OperationResponse, Error = OperationError> + Send,
    S::Future: Send,
    F: Fn() -> f64,
{
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(64);
    let handle = registry.register(kind, tx);
    let caller_origin = match kind {
        ConnectionKind::Client => CallerOrigin::Client,
        ConnectionKind::Peer => CallerOrigin::Peer,
    };
    let mut shutdown_rx = shutdown.shutdown_receiver();

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            outbound = rx.recv() => {
                let Some(frame) = outbound else { break };
                if framed.send(Bytes::from(frame)).await.is_err() {
                    break;
                }
            }
            inbound = framed.next() => {
                let Some(Ok(bytes)) = inbound else { break };
                let _guard = shutdown.in_flight_guard();
                let response = match serde_json::from_slice::<Request>(&bytes) {
                    Ok(request) => {
                        let op = classifier.classify(&request, now(), caller_origin);
                        match op {
                            Ok(op) => match pipeline.ready().await {
                                Ok(svc) => response_for(svc.call(op).await),
                                Err(err) => response_for(Err(err)),
                            },
                            Err(err) => Response::err(error_status(&err), err.to_string()),
                        }
                    }
                    Err(err) => Response::err(2, format!("malformed request: {err}")),
                };
                let Ok(encoded) = serde_json::to_vec(&response) else { break };
                if framed.send(Bytes::from(encoded)).await.is_err() {
                    break;
                }
            }
        }
    }

    registry.remove(handle.id);
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;

    use tokio::net::TcpListener;

    use super::*;
    use crate::operation::Operation;

    #[derive(Clone)]
    struct EchoRouter;

    impl Service<Operation> for EchoRouter {
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
    async fn round_trips_a_request_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Arc::new(ShutdownController::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let classifier = Arc::new(OperationClassifier::new(5_000));

        let shutdown_clone = Arc::clone(&shutdown);
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            handle_connection(stream, ConnectionKind::Client, classifier, EchoRouter, registry, &shutdown_clone, || 0.0).await;
        });

        let client_stream = TcpStream::connect(addr).await.unwrap();
        let mut client = Framed::new(client_stream, LengthDelimitedCodec::new());
        let request = Request { action: "get_cluster_status".to_string(), options: serde_json::json!({}), node: None };
        client.send(Bytes::from(serde_json::to_vec(&request).unwrap())).await.unwrap();

        let reply = tokio::time::timeout(Duration::from_secs(2), client.next()).await.unwrap().unwrap().unwrap();
        let response: Response = serde_json::from_slice(&reply).unwrap();
        assert_eq!(response.status, 0);

        drop(client);
        shutdown.trigger_shutdown();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn malformed_frame_gets_usage_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Arc::new(ShutdownController::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let classifier = Arc::new(OperationClassifier::new(5_000));

        let shutdown_clone = Arc::clone(&shutdown);
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            handle_connection(stream, ConnectionKind::Client, classifier, EchoRouter, registry, &shutdown_clone, || 0.0).await;
        });

        let client_stream = TcpStream::connect(addr).await.unwrap();
        let mut client = Framed::new(client_stream, LengthDelimitedCodec::new());
        client.send(Bytes::from_static(b"not json")).await.unwrap();

        let reply = tokio::time::timeout(Duration::from_secs(2), client.next()).await.unwrap().unwrap().unwrap();
        let response: Response = serde_json::from_slice(&reply).unwrap();
        assert_eq!(response.status, 2);

        drop(client);
        shutdown.trigger_shutdown();
        server.await.unwrap();
    }
}
