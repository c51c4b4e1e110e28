//! Daemon bootstrap configuration (§9 "process-wide `Environment`"),
//! distinct from the per-object config engine in `agent_core::config`.
//! Assembled once at startup from CLI args/env, hot-reloaded only by
//! building a whole new `AgentConfig` and swapping it under the caller's
//! own lock -- this struct itself has no interior mutability.

use std::path::PathBuf;

use clap::Parser;

/// CLI/env-sourced daemon configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "clusterd-agent", about = "Clustered service-management agent")]
pub struct AgentConfig {
    /// This node's name; defaults to the lowercased hostname.
    #[arg(long, env = "CLUSTERD_NODENAME")]
    pub nodename: Option<String>,

    /// Directory holding `node.conf`, `auth.conf`, and object `.conf` files.
    #[arg(long, env = "CLUSTERD_ETC", default_value = "/etc/clusterd")]
    pub etc: PathBuf,

    /// Directory holding persisted runtime state (scheduler timestamps,
    /// reboot flag, per-object caches).
    #[arg(long, env = "CLUSTERD_VAR", default_value = "/var/lib/clusterd")]
    pub var: PathBuf,

    /// Listener bind address (§6 default `0.0.0.0`).
    #[arg(long, env = "CLUSTERD_LISTENER_ADDR", default_value = "0.0.0.0")]
    pub listener_addr: String,

    /// Listener bind port (§6 default `1214`).
    #[arg(long, env = "CLUSTERD_LISTENER_PORT", default_value_t = 1214)]
    pub listener_port: u16,

    /// Prometheus metrics HTTP port (ambient concern, not part of the
    /// cluster wire protocol).
    #[arg(long, env = "CLUSTERD_METRICS_PORT", default_value_t = 9090)]
    pub metrics_port: u16,

    /// Bounded listener worker pool size (§5 default 16).
    #[arg(long, env = "CLUSTERD_WORKERS", default_value_t = 16)]
    pub listener_workers: usize,

    /// Grace period tasks are given to drain before being aborted (§5,
    /// default 5s).
    #[arg(long, env = "CLUSTERD_SHUTDOWN_GRACE_MS", default_value_t = 5_000)]
    pub shutdown_grace_ms: u64,

    /// Log format: `pretty` for interactive use, `json` for production.
    #[arg(long, env = "CLUSTERD_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

impl AgentConfig {
    #[must_use]
    pub fn resolved_nodename(&self) -> String {
        self.nodename.clone().unwrap_or_else(|| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "localhost".to_string())
                .to_lowercase()
        })
    }

    #[must_use]
    pub fn node_conf_path(&self) -> PathBuf {
        self.etc.join("node.conf")
    }

    #[must_use]
    pub fn auth_conf_path(&self) -> PathBuf {
        self.etc.join("auth.conf")
    }

    #[must_use]
    pub fn object_conf_path(&self, namespace_display: &str, kind: &str, name: &str) -> PathBuf {
        self.etc.join(namespace_display).join(kind).join(format!("{name}.conf"))
    }

    #[must_use]
    pub fn scheduler_last_run_path(&self, task: &str) -> PathBuf {
        self.var.join(format!("{task}.last"))
    }

    #[must_use]
    pub fn reboot_flag_path(&self) -> PathBuf {
        self.var.join("REBOOT_FLAG")
    }

    #[must_use]
    pub fn last_boot_id_path(&self) -> PathBuf {
        self.var.join("last_boot_id")
    }
}
