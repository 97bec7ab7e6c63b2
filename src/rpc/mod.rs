pub mod error;
pub mod wait;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::metrics::{metrics_handler, Metrics};
use wait::WaitState;

/// Assembles the RPC surface (C8) plus the ambient health endpoint.
/// Transport is plain HTTP/JSON — the wire framing itself is out of scope,
/// any request/response transport suffices (spec.md §1).
pub fn routes(state: Arc<WaitState>) -> Router {
    Router::new()
        .route("/wait", post(wait::wait))
        .route("/healthz", get(wait::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The Prometheus exposition endpoint, served on its own port (spec.md §6
/// "metrics port") rather than multiplexed onto the RPC surface.
pub fn metrics_routes(metrics: Metrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}
