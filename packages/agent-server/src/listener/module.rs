//! `ListenerModule` (C8, §4.8): the framed TCP listener plus the ambient
//! `/health` and `/metrics` HTTP endpoint, following the teacher's
//! deferred-startup lifecycle (`network::module::NetworkModule`): `new()`
//! allocates shared state, `start()` binds both listeners, `serve()`
//! accepts connections until shutdown fires.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;

use super::config_store::ObjectConfigStore;
use super::connection::{ConnectionKind, ConnectionRegistry};
use super::router::{NodeFreezeFlag, RequestRouter};
use crate::cluster_state::ClusterState;
use crate::config::AgentConfig;
use crate::eventbus::EventBus;
use crate::operation::middleware::build_operation_pipeline;
use crate::operation::OperationClassifier;
use crate::runtime::{HealthState, ManagedService, ServiceContext, ShutdownController};

fn unix_now() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0)
}

#[derive(Clone)]
struct HttpState {
    shutdown: Arc<ShutdownController>,
    metrics_handle: PrometheusHandle,
}

async fn health_handler(State(state): State<HttpState>) -> Json<serde_json::Value> {
    let healthy = matches!(state.shutdown.health_state(), HealthState::Ready);
    Json(serde_json::json!({
        "state": format!("{:?}", state.shutdown.health_state()),
        "healthy": healthy,
        "in_flight": state.shutdown.in_flight_count(),
    }))
}

async fn metrics_handler(State(state): State<HttpState>) -> String {
    state.metrics_handle.render()
}

/// The listener (C8) and its ambient HTTP surface. Holds everything a
/// connection handler needs; not `Clone` -- one instance per daemon.
pub struct ListenerModule {
    listener_addr: String,
    listener_port: u16,
    metrics_port: u16,
    workers: usize,
    nodename: String,
    cluster_state: Arc<ClusterState>,
    config_store: Arc<ObjectConfigStore>,
    events: EventBus,
    freeze: NodeFreezeFlag,
    shutdown: Arc<ShutdownController>,
    tcp_listener: parking_lot::Mutex<Option<TcpListener>>,
}

impl ListenerModule {
    #[must_use]
    pub fn new(config: &AgentConfig, nodename: String, cluster_state: Arc<ClusterState>, config_store: Arc<ObjectConfigStore>, events: EventBus) -> Self {
        Self {
            listener_addr: config.listener_addr.clone(),
            listener_port: config.listener_port,
            metrics_port: config.metrics_port,
            workers: config.listener_workers,
            nodename,
            cluster_state,
            config_store,
            events,
            freeze: NodeFreezeFlag::default(),
            shutdown: Arc::new(ShutdownController::new()),
            tcp_listener: parking_lot::Mutex::new(None),
        }
    }

    #[must_use]
    pub fn freeze_flag(&self) -> NodeFreezeFlag {
        self.freeze.clone()
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Binds the listener's TCP socket. Returns the bound port (useful in
    /// tests that request an ephemeral port with `0`).
    ///
    /// # Errors
    /// Returns an I/O error if the address cannot be bound.
    pub async fn start(&self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.listener_addr, self.listener_port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();
        *self.tcp_listener.lock() = Some(listener);
        Ok(port)
    }

    /// Spawns the ambient `/health` + `/metrics` HTTP server and returns
    /// its join handle; the daemon doesn't wait on it directly, it's torn
    /// down with the rest of the process.
    ///
    /// # Errors
    /// Returns an error if the metrics recorder or the HTTP socket can't
    /// be installed/bound.
    pub async fn spawn_http(&self) -> anyhow::Result<tokio::task::JoinHandle<()>> {
        let metrics_handle = PrometheusBuilder::new().install_recorder()?;
        let state = HttpState { shutdown: Arc::clone(&self.shutdown), metrics_handle };
        let router = Router::new().route("/health", get(health_handler)).route("/metrics", get(metrics_handler)).with_state(state);
        let addr: SocketAddr = format!("0.0.0.0:{}", self.metrics_port).parse()?;
        let listener = TcpListener::bind(addr).await?;
        Ok(tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        }))
    }

    /// Accepts connections until the shutdown signal fires, dispatching
    /// each to its own task bounded by a `workers`-sized semaphore (§5).
    ///
    /// # Panics
    /// Panics if `start()` was not called first.
    pub async fn serve(&self) {
        let tcp_listener = self.tcp_listener.lock().take().expect("start() must be called before serve()");
        let registry = Arc::new(ConnectionRegistry::new());
        let classifier = Arc::new(OperationClassifier::new(30_000));
        let router = RequestRouter::new(self.nodename.clone(), Arc::clone(&self.cluster_state), Arc::clone(&self.config_store), self.events.clone(), self.freeze.clone());
        let pipeline = build_operation_pipeline(router, self.workers);
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut shutdown_rx = self.shutdown.shutdown_receiver();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                accepted = tcp_listener.accept() => {
                    let Ok((stream, _peer_addr)) = accepted else { continue };
                    let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                        drop(stream);
                        continue;
                    };
                    let classifier = Arc::clone(&classifier);
                    let pipeline = pipeline.clone();
                    let registry = Arc::clone(&registry);
                    let shutdown = Arc::clone(&self.shutdown);
                    tokio::spawn(async move {
                        let _permit = permit;
                        super::handler::handle_connection(stream, ConnectionKind::Client, classifier, pipeline, registry, &shutdown, unix_now).await;
                    });
                }
            }
        }
    }
}

#[async_trait]
impl ManagedService for ListenerModule {
    fn name(&self) -> &'static str {
        "listener"
    }

    async fn init(&self, _ctx: &ServiceContext) -> anyhow::Result<()> {
        self.start().await?;
        self.spawn_http().await?;
        self.shutdown.set_ready();
        Ok(())
    }

    async fn shutdown(&self, _terminate: bool) -> anyhow::Result<()> {
        self.shutdown.trigger_shutdown();
        self.shutdown.wait_for_drain(std::time::Duration::from_secs(5)).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module() -> ListenerModule {
        use clap::Parser;
        let config = Arc::new(AgentConfig { listener_port: 0, metrics_port: 0, ..AgentConfig::parse_from::<_, &str>(["clusterd-agent"]) });
        ListenerModule::new(
            &config,
            "n1".to_string(),
            ClusterState::new("n1", EventBus::default()),
            Arc::new(ObjectConfigStore::new(Arc::clone(&config), "n1".to_string(), vec!["n1".to_string()])),
            EventBus::default(),
        )
    }

    #[tokio::test]
    async fn start_binds_an_ephemeral_port() {
        let listener = module();
        let port = listener.start().await.unwrap();
        assert_ne!(port, 0);
    }

    #[tokio::test]
    async fn serve_stops_promptly_on_shutdown() {
        let listener = module();
        listener.start().await.unwrap();
        let shutdown = listener.shutdown_controller();
        let handle = tokio::spawn(async move {
            listener.serve().await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        shutdown.trigger_shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(2), handle).await.unwrap().unwrap();
    }
}
