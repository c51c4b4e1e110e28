//! `clusterd-agent` daemon entrypoint: wires every C1-C10 subsystem
//! together and drives them until SIGTERM/SIGINT, following the ambient
//! bootstrap shape from the pack's own service binaries (config from
//! env/CLI, `tracing_subscriber` init, spawn background loops, serve
//! until shutdown).

use std::collections::HashMap;
use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use agent_core::config::{builtin_keywords, Builtins, ConfigEngine, ConfigValue, KeywordRegistry};
use agent_core::crypt::ClusterKey;
use agent_server::config::AgentConfig;
use agent_server::heartbeat::drivers::unicast::UnicastDriver;
use agent_server::heartbeat::drivers::HbDriver;
use agent_server::heartbeat::{HeartbeatSupervisor, PeerTracker, PhiAccrualConfig, SuspicionTracker};
use agent_server::listener::{ListenerModule, ObjectConfigStore};
use agent_server::monitor::{Candidate, MonitorOrchestrator, NodeStats};
use agent_server::quorum::QuorumMonitor;
use agent_server::runtime::{ServiceContext, ServiceRegistry};
use agent_server::{cluster_state::ClusterState, eventbus::EventBus};
use clap::Parser;

fn unix_now() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or_default()
}

/// Cluster-wide settings read from `node.conf` at boot (§9 bootstrap).
struct ClusterBootstrap {
    cluster_name: String,
    cluster_secret: String,
    cluster_nodes: Vec<String>,
    quorum_enabled: bool,
    hb_period_secs: f64,
    hb_timeout_secs: f64,
}

fn load_bootstrap(config: &AgentConfig, nodename: &str, registry: Arc<KeywordRegistry>) -> anyhow::Result<ClusterBootstrap> {
    let builtins = Builtins {
        nodename: nodename.to_string(),
        svcname: String::new(),
        clusternodes: Vec::new(),
        clusterdrpnodes: Vec::new(),
        is_member: Box::new(|_, _| false),
    };
    let engine = ConfigEngine::load(&config.node_conf_path(), registry, builtins)?;

    let cluster_name = engine.get("cluster", "name", None, true)?.as_str().unwrap_or_default().to_string();
    let cluster_secret = engine.get("cluster", "secret", None, true)?.as_str().unwrap_or_default().to_string();
    let cluster_nodes = match engine.get("cluster", "nodes", None, true)? {
        ConfigValue::NodesSelector(nodes) => nodes.iter().map(|n| n.as_str().to_string()).collect(),
        _ => vec![nodename.to_string()],
    };
    let quorum_enabled = engine.get("cluster", "quorum", None, true)?.as_bool().unwrap_or(true);
    let hb_period_secs = match engine.get("hb", "hb_period", None, true)? {
        ConfigValue::Duration(secs) => secs,
        _ => 5.0,
    };
    let hb_timeout_secs = match engine.get("hb", "timeout", None, true)? {
        ConfigValue::Duration(secs) => secs,
        _ => 15.0,
    };

    Ok(ClusterBootstrap { cluster_name, cluster_secret, cluster_nodes, quorum_enabled, hb_period_secs, hb_timeout_secs })
}

/// Heartbeat port is the listener port's successor; `node#n.conf`-style
/// per-driver port overrides aren't implemented (see `DESIGN.md`).
fn hb_bind_port(config: &AgentConfig) -> u16 {
    config.listener_port.saturating_add(1)
}

fn resolve_peer_addrs(peers: &[String], hb_port: u16) -> HashMap<String, std::net::SocketAddr> {
    let mut out = HashMap::new();
    for peer in peers {
        if let Ok(mut addrs) = (peer.as_str(), hb_port).to_socket_addrs() {
            if let Some(addr) = addrs.next() {
                out.insert(peer.clone(), addr);
            }
        }
    }
    out
}

/// Reads back the `global_expect` an earlier `set_global_expect` call
/// recorded for `path` under this node's own branch (written by
/// `listener::router::RequestRouter::dispatch`'s `SetGlobalExpect` arm,
/// using the same pointer shape). Defaults to `started` when nothing has
/// been set yet -- a freshly-registered object is assumed wanted up.
fn global_expect_for(snapshot: &serde_json::Value, nodename: &str, path: &agent_core::ObjectPath) -> agent_core::GlobalExpect {
    let pointer = format!("services/{}/global_expect", path.to_string().replace('/', "_"));
    let raw = snapshot
        .get(nodename)
        .and_then(|branch| pointer.split('/').try_fold(branch, |acc, seg| acc.get(seg)))
        .and_then(|v| v.get("expect"))
        .and_then(serde_json::Value::as_str)
        .map(str::to_lowercase);
    raw.and_then(|r| agent_core::GlobalExpect::parse(&r)).map_or(agent_core::GlobalExpect::Started, |(ge, _)| ge)
}

fn node_stats_from_snapshot(snapshot: &serde_json::Value, nodename: &str) -> NodeStats {
    let branch = snapshot.get(nodename);
    let load_15m = branch.and_then(|b| b.get("stats")).and_then(|s| s.get("load_15m")).and_then(serde_json::Value::as_f64).unwrap_or(1.0);
    let mem_avail = branch.and_then(|b| b.get("stats")).and_then(|s| s.get("mem_avail")).and_then(serde_json::Value::as_f64).unwrap_or(50.0);
    let swap_avail = branch.and_then(|b| b.get("stats")).and_then(|s| s.get("swap_avail")).and_then(serde_json::Value::as_f64).unwrap_or(50.0);
    let frozen = branch.and_then(|b| b.get("frozen")).and_then(serde_json::Value::as_bool).unwrap_or(false);
    let avail_warn_or_err = branch.and_then(|b| b.get("avail")).and_then(serde_json::Value::as_str).is_some_and(|a| a == "warn" || a == "err");
    NodeStats { load_15m, mem_avail, swap_avail, frozen, avail_warn_or_err }
}

async fn run_monitor_loop(
    orchestrator: Arc<MonitorOrchestrator>,
    orchestrator_nodename: String,
    cluster_state: Arc<ClusterState>,
    cluster_nodes: Vec<String>,
    quorum: Arc<QuorumMonitor>,
    daemon_start: f64,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(2));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = unix_now();
                let quorum_ok = quorum.evaluate().await.is_ok();
                let maintenance_grace_active = now - daemon_start < 60.0;
                let snapshot = cluster_state.snapshot();
                let candidates: Vec<Candidate> = cluster_nodes.iter().map(|n| Candidate { nodename: n.clone(), stats: node_stats_from_snapshot(&snapshot, n) }).collect();
                for path in orchestrator.registered_paths() {
                    let expect = global_expect_for(&snapshot, &orchestrator_nodename, &path);
                    if let Err(lost) = orchestrator.tick(&path, &candidates, expect, now, quorum_ok, maintenance_grace_active).await {
                        tracing::warn!(path = %path, live_votes = lost.live_votes, total_nodes = lost.total_nodes, "quorum lost, orchestration suspended");
                    }
                }
            }
            _ = shutdown.changed() => { if *shutdown.borrow() { return; } }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(AgentConfig::parse());

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    if config.log_format == "json" {
        tracing_subscriber::fmt().with_env_filter(env_filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let nodename = config.resolved_nodename();
    let daemon_start = unix_now();
    tracing::info!(nodename, "clusterd-agent starting");

    let keyword_registry = Arc::new(KeywordRegistry::new(builtin_keywords()));
    let bootstrap = load_bootstrap(&config, &nodename, Arc::clone(&keyword_registry))?;

    let cluster_key = ClusterKey::derive(bootstrap.cluster_secret.as_bytes());
    let events = EventBus::default();
    let cluster_state = ClusterState::new(nodename.clone(), events.clone());

    let peer_tracker = Arc::new(PeerTracker::new(bootstrap.hb_timeout_secs));
    let suspicion = Arc::new(SuspicionTracker::new(PhiAccrualConfig::default()));

    let peers: Vec<String> = bootstrap.cluster_nodes.iter().filter(|n| **n != nodename).cloned().collect();
    let hb_port = hb_bind_port(&config);
    let hb_bind_addr = format!("{}:{hb_port}", config.listener_addr).parse()?;
    let peer_addrs = resolve_peer_addrs(&peers, hb_port);
    let unicast = UnicastDriver::bind(hb_bind_addr, peer_addrs).await?;
    let drivers: Vec<Arc<dyn HbDriver>> = vec![Arc::new(unicast)];

    let supervisor = HeartbeatSupervisor::new(
        nodename.clone(),
        bootstrap.cluster_name.clone(),
        cluster_key,
        drivers,
        Arc::clone(&peer_tracker),
        Arc::clone(&suspicion),
        Arc::clone(&cluster_state),
        events.clone(),
        bootstrap.hb_period_secs,
    );

    let quorum = Arc::new(QuorumMonitor::new(if bootstrap.quorum_enabled { bootstrap.cluster_nodes.len() } else { 1 }, Arc::clone(&peer_tracker), Vec::new()));

    let config_store = Arc::new(ObjectConfigStore::new(Arc::clone(&config), nodename.clone(), bootstrap.cluster_nodes.clone()));
    let listener_module = ListenerModule::new(&config, nodename.clone(), Arc::clone(&cluster_state), config_store, events.clone());
    let monitor_orchestrator = MonitorOrchestrator::new(nodename.clone(), Arc::clone(&cluster_state), events.clone(), daemon_start);

    // `ServiceRegistry` takes ownership of each subsystem and hands back a
    // shared `Arc<T>` (by concrete type) for the background loops below to
    // drive directly -- the same register-then-fetch pattern the registry's
    // own tests exercise.
    let registry = ServiceRegistry::new();
    registry.register(supervisor);
    registry.register(listener_module);
    registry.register(monitor_orchestrator);

    let supervisor = registry.get::<HeartbeatSupervisor>().expect("heartbeat supervisor registered");
    let listener = registry.get::<ListenerModule>().expect("listener registered");
    let monitor = registry.get::<MonitorOrchestrator>().expect("monitor registered");

    let ctx = ServiceContext { config: Arc::clone(&config) };
    registry.init_all(&ctx).await?;

    let hb_task = tokio::spawn({
        let supervisor = Arc::clone(&supervisor);
        let shutdown = listener.shutdown_controller().shutdown_receiver();
        let peers = peers.clone();
        async move { supervisor.run(peers, shutdown).await }
    });

    let listener_task = tokio::spawn({
        let listener = Arc::clone(&listener);
        async move { listener.serve().await }
    });

    let monitor_task = tokio::spawn(run_monitor_loop(
        Arc::clone(&monitor),
        nodename.clone(),
        Arc::clone(&cluster_state),
        bootstrap.cluster_nodes.clone(),
        Arc::clone(&quorum),
        daemon_start,
        listener.shutdown_controller().shutdown_receiver(),
    ));

    wait_for_termination_signal().await;
    tracing::info!("shutdown signal received, draining");
    registry.shutdown_all(false).await?;

    let _ = tokio::time::timeout(std::time::Duration::from_millis(config.shutdown_grace_ms), async {
        let _ = hb_task.await;
        let _ = listener_task.await;
        let _ = monitor_task.await;
    })
    .await;

    tracing::info!("clusterd-agent stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_termination_signal() {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
