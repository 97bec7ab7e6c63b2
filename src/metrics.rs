use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Counters/histograms for the admission engine (C9, spec.md §6). Names are
/// part of the external contract — do not rename without a deprecation
/// period downstream consumers can observe.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub wait_duration_seconds: Histogram,
    pub pod_not_found: IntCounter,
    pub wait_failed: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let buckets = prometheus::exponential_buckets(0.1, 4.9497, 5)
            .expect("0.1s base and 5-step factor are fixed constants");
        let wait_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "pod_pacemaker_wait_duration_seconds",
                "Time spent inside the admission chain for a successful Wait call",
            )
            .buckets(buckets),
        )
        .expect("static histogram config");

        let pod_not_found = IntCounter::new(
            "pod_pacemaker_pod_not_found",
            "Wait calls that failed to resolve their workload within the deadline",
        )
        .expect("static counter config");

        let wait_failed = IntCounterVec::new(
            Opts::new(
                "pod_pacemaker_wait_failed",
                "Wait calls that failed, by reason",
            ),
            &["reason"],
        )
        .expect("static counter config");

        registry
            .register(Box::new(wait_duration_seconds.clone()))
            .expect("metric registered once");
        registry
            .register(Box::new(pod_not_found.clone()))
            .expect("metric registered once");
        registry
            .register(Box::new(wait_failed.clone()))
            .expect("metric registered once");

        Self {
            registry,
            wait_duration_seconds,
            pod_not_found,
            wait_failed,
        }
    }

    pub fn record_wait_failed(&self, reason: &str) {
        self.wait_failed.with_label_values(&[reason]).inc();
    }

    fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        encoder
            .encode(&families, &mut buf)
            .expect("prometheus text encoding never fails for well-formed metrics");
        String::from_utf8(buf).expect("prometheus text encoder emits valid utf-8")
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Ambient `/metrics` exposition endpoint (spec.md §1 lists metrics
/// exposition itself as out of scope for the core, but carrying the
/// standard Prometheus text endpoint is the ambient stack this daemon
/// ships with regardless).
pub async fn metrics_handler(State(metrics): State<Metrics>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics.encode(),
    )
}
