use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::error::{failure_message, failure_reason};
use crate::gate::Gate;
use crate::metrics::Metrics;
use crate::workload::source::{resolve_with_backoff, WorkloadSource};
use crate::workload::{RequestData, SlotId};

/// Poll interval while resolving a workload against the local cache
/// (spec.md §4.8 step 1).
const WORKLOAD_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Deserialize)]
pub struct WaitRequest {
    pub slot_name: String,
    #[serde(default)]
    pub priority: i64,
    pub max_wait_time_seconds: u64,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct WaitResponse {
    pub success: bool,
    pub message: String,
}

impl WaitResponse {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Shared state the `Wait` handler needs — assembled by the binary
/// entrypoint from the chain, the workload cache, and the metrics handle.
pub struct WaitState {
    pub chain: Arc<dyn Gate>,
    pub workload_source: Arc<dyn WorkloadSource>,
    pub metrics: Metrics,
    pub skip_daemonsets: bool,
}

/// `Wait(slotName)` (C8, spec.md §4.8).
pub async fn wait(State(state): State<Arc<WaitState>>, Json(req): Json<WaitRequest>) -> Json<WaitResponse> {
    let slot_id = SlotId::from(req.slot_name.clone());
    let cancel = CancellationToken::new();
    let timeout_cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(req.max_wait_time_seconds)).await;
        timeout_cancel.cancel();
    });

    let start = tokio::time::Instant::now();

    // Step 1: resolve the workload from the local cache.
    let workload = resolve_with_backoff(
        state.workload_source.as_ref(),
        &slot_id,
        &cancel,
        WORKLOAD_POLL_INTERVAL,
    )
    .await;

    let workload = match workload {
        Some(w) => w,
        None => {
            warn!(slot = %slot_id, "workload not found within deadline");
            state.metrics.pod_not_found.inc();
            return Json(WaitResponse::failed("Failed to get pod"));
        }
    };

    // Step 2: daemon-side daemonset skip.
    if state.skip_daemonsets && workload.is_daemonset_owned() {
        info!(slot = %slot_id, "skipping daemonset workload");
        return Json(WaitResponse::ok("Skipped daemonset"));
    }

    // Step 3: run the admission chain.
    let data = RequestData {
        priority: req.priority,
        workload: Some(workload),
    };
    if let Err(err) = state.chain.acquire(&cancel, &slot_id, &data).await {
        warn!(slot = %slot_id, error = %err, "failed to acquire slot");
        state.metrics.record_wait_failed(failure_reason(&err));
        return Json(WaitResponse::failed(failure_message(&err)));
    }

    // Step 4: success.
    state
        .metrics
        .wait_duration_seconds
        .observe(start.elapsed().as_secs_f64());
    info!(slot = %slot_id, "slot acquired");
    Json(WaitResponse::ok(""))
}

/// Health endpoint: serving as long as the process is up. There is no
/// internal readiness condition to report beyond that (spec.md §6).
pub async fn health() -> &'static str {
    "serving"
}
