use std::time::Duration;

use clap::Parser;

/// Daemon configuration (spec.md §6 "Daemon configuration"), parsed from
/// flags with env-var fallback.
#[derive(Debug, Clone, Parser)]
#[command(name = "pod-pacemaker", about = "Per-node admission daemon")]
pub struct AppConfig {
    /// RPC listen address (TCP; a stream-oriented transport per spec.md §6).
    #[arg(long, env = "PACEMAKER_LISTEN_ADDR", default_value = "0.0.0.0:9090")]
    pub listen_addr: String,

    /// This node's name, used to match policy node selectors.
    #[arg(long, env = "NODE_NAME")]
    pub node_name: String,

    /// Skip the admission chain entirely for DaemonSet-owned workloads.
    #[arg(long, env = "PACEMAKER_SKIP_DAEMONSETS", default_value_t = true)]
    pub skip_daemonsets: bool,

    /// Taint key to remove from this node on startup. Empty disables the
    /// startup side effect.
    #[arg(long, env = "PACEMAKER_TAINT_TO_REMOVE", default_value = "pod-limiter")]
    pub taint_to_remove: String,

    /// Port for the Prometheus `/metrics` exposition endpoint.
    #[arg(long, env = "PACEMAKER_METRICS_PORT", default_value_t = 9091)]
    pub metrics_port: u16,

    /// Raise the log filter to debug.
    #[arg(long, env = "PACEMAKER_DEBUG", default_value_t = false)]
    pub debug: bool,

    /// Interval between load-sampler reads (CPU/IO/load-average), seconds.
    #[arg(long, env = "PACEMAKER_SAMPLE_INTERVAL_SECS", default_value_t = 5)]
    pub sample_interval_secs: u64,

    /// Interval between reconciliation sweeps over active slots, seconds.
    #[arg(long, env = "PACEMAKER_RECONCILE_INTERVAL_SECS", default_value_t = 10)]
    pub reconcile_interval_secs: u64,
}

impl AppConfig {
    pub fn from_args() -> Self {
        Self::parse()
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn log_filter(&self) -> &'static str {
        if self.debug {
            "pod_pacemaker=debug,tower_http=debug"
        } else {
            "pod_pacemaker=info,tower_http=info"
        }
    }
}
