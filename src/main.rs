mod collaborators;
mod config;
mod gate;
mod metrics;
mod node;
mod policy;
mod rpc;
mod workload;

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::collaborators::{NoNodeTaints, NoPolicySource, NoWorkloadSource};
use crate::config::AppConfig;
use crate::gate::chain::StrategyChain;
use crate::gate::snapshot::GateSnapshot;
use crate::metrics::Metrics;
use crate::node::remove_startup_taint;
use crate::policy::resolver::PolicyResolver;
use crate::policy::source::PolicySource;
use crate::rpc::wait::WaitState;
use crate::workload::events::{ActiveSlotRegistry, WorkloadEventHandler};
use crate::workload::source::WorkloadSource;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present (not required)
    dotenvy::dotenv().ok();

    let config = AppConfig::from_args();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter().into()),
        )
        .init();

    info!(
        "Starting pod-pacemaker v{} on node {}",
        env!("CARGO_PKG_VERSION"),
        config.node_name
    );

    // External collaborators. The cluster-API watchers that would normally
    // back these traits are out of scope here; a full deployment supplies
    // its own `PolicySource`/`WorkloadSource`/`NodeTaints` implementations
    // wired to its cluster client instead of these no-op stand-ins.
    let policy_source: Arc<dyn PolicySource> = Arc::new(NoPolicySource);
    let workload_source: Arc<dyn WorkloadSource> = Arc::new(NoWorkloadSource);
    let node_taints = NoNodeTaints;

    if let Err(e) = remove_startup_taint(&node_taints, &config.node_name, &config.taint_to_remove).await {
        warn!(error = %e, "failed to remove startup taint");
    }

    let cpu_count = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    let snapshot = Arc::new(GateSnapshot::new());
    let registry = Arc::new(ActiveSlotRegistry::new());
    let resolver = Arc::new(PolicyResolver::new(
        policy_source,
        snapshot.clone(),
        registry.clone(),
        cpu_count,
        config.sample_interval(),
    ));

    let shutdown = tokio_util::sync::CancellationToken::new();
    tokio::spawn(resolver.run(shutdown.clone()));

    let chain: Arc<dyn gate::Gate> = Arc::new(StrategyChain::new(snapshot));

    let event_handler = Arc::new(WorkloadEventHandler::new(
        chain.clone(),
        registry,
        workload_source.clone(),
    ));
    event_handler.spawn_reconciliation(config.reconcile_interval(), shutdown.clone());

    let metrics = Metrics::new();
    let wait_state = Arc::new(WaitState {
        chain,
        workload_source,
        metrics: metrics.clone(),
        skip_daemonsets: config.skip_daemonsets,
    });

    let rpc_app = rpc::routes(wait_state);
    let metrics_app = rpc::metrics_routes(metrics);

    let rpc_addr = config.listen_addr.parse::<std::net::SocketAddr>()?;
    let metrics_addr: std::net::SocketAddr = format!("0.0.0.0:{}", config.metrics_port).parse()?;

    info!(addr = %rpc_addr, "starting RPC server");
    let rpc_listener = tokio::net::TcpListener::bind(rpc_addr).await?;

    info!(addr = %metrics_addr, "starting metrics server");
    let metrics_listener = tokio::net::TcpListener::bind(metrics_addr).await?;

    tokio::try_join!(
        async { axum::serve(rpc_listener, rpc_app).await.map_err(anyhow::Error::from) },
        async { axum::serve(metrics_listener, metrics_app).await.map_err(anyhow::Error::from) },
    )?;

    Ok(())
}
