use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sysinfo::{CpuRefreshKind, RefreshKind, System};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::concurrency::ConcurrencyController;

/// Which scalar a load-based controller's predicate reads (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadKind {
    Cpu,
    IoWait,
    LoadAverage { per_core: bool },
}

/// Default interval between samples (spec.md §5): "Rate-limiter back-off and
/// load-sampler intervals (5 s default for CPU/IO/load-avg) are compile-time
/// defaults."
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

/// Background task that periodically refreshes a scalar metric consumed by
/// one load-based controller's predicate (C3). Stores the latest sample as
/// fixed-point millipercent in an atomic so the predicate can read it
/// lock-free.
///
/// The `incrementBy` interaction (spec.md §4.3) is implemented in
/// `ConcurrencyController::with_load_predicate`'s `on_acquire` side effect,
/// not here — the sampler only ever *overwrites* `current_value`, it never
/// combines with the increment itself.
pub struct LoadSampler {
    current_millipercent: Arc<AtomicU64>,
    kind: LoadKind,
}

impl LoadSampler {
    pub fn new(kind: LoadKind) -> Self {
        Self {
            current_millipercent: Arc::new(AtomicU64::new(0)),
            kind,
        }
    }

    /// Latest sample, as a percentage (0.0..=100.0, or higher for load
    /// average expressed as a ratio).
    pub fn current(&self) -> f64 {
        self.current_millipercent.load(Ordering::Relaxed) as f64 / 1000.0
    }

    /// Overwrite the current value (used by the increment side effect on
    /// each successful acquisition, spec.md §4.3).
    pub fn inflate(&self, by: f64) {
        let delta = (by.max(0.0) * 1000.0) as u64;
        self.current_millipercent.fetch_add(delta, Ordering::Relaxed);
    }

    fn store(&self, value: f64) {
        self.current_millipercent
            .store((value.max(0.0) * 1000.0) as u64, Ordering::Relaxed);
    }

    /// Spawn the sampling loop. On `cancel`, the controller's predicate is
    /// flipped into `SamplerClosed` (spec.md: "the source signals its
    /// controller's predicate to henceforth return an error") and the task
    /// exits.
    pub fn spawn(
        self: Arc<Self>,
        controller: Arc<ConcurrencyController>,
        interval: Duration,
        cancel: CancellationToken,
    ) {
        tokio::spawn(async move {
            let mut system = System::new_with_specifics(
                RefreshKind::new().with_cpu(CpuRefreshKind::everything()),
            );
            let mut ticker = tokio::time::interval(interval);
            let mut iowait_state: Option<(u64, u64)> = None;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(kind = ?self.kind, "load sampler shutting down");
                        controller.close_predicate();
                        return;
                    }
                    _ = ticker.tick() => {
                        let value = sample_once(&mut system, self.kind, &mut iowait_state);
                        match value {
                            Ok(v) => self.store(v),
                            Err(e) => {
                                // spec.md §7: sampler read error => treat as 0, keep sampling.
                                warn!(kind = ?self.kind, error = %e, "sampler read failed, treating as 0");
                                self.store(0.0);
                            }
                        }
                        controller.notify();
                    }
                }
            }
        });
    }
}

fn sample_once(system: &mut System, kind: LoadKind, iowait_state: &mut Option<(u64, u64)>) -> anyhow::Result<f64> {
    match kind {
        LoadKind::Cpu => {
            system.refresh_cpu();
            Ok(system.global_cpu_info().cpu_usage() as f64)
        }
        LoadKind::IoWait => {
            // sysinfo has no direct iowait accessor; derive it the way
            // `GetIoWait` does (delta of /proc/stat's iowait field between
            // two reads, over the elapsed ticks), not a since-boot average.
            read_iowait_percent(iowait_state)
        }
        LoadKind::LoadAverage { per_core } => {
            let avg = System::load_average();
            if per_core {
                let cores = system.cpus().len().max(1) as f64;
                Ok(avg.one / cores)
            } else {
                Ok(avg.one)
            }
        }
    }
}

/// Percentage of CPU time spent in iowait since the previous sample. The
/// first call after (re)start has no prior snapshot to diff against, so it
/// reports 0 and seeds `state` — `GetIoWait` has the same bootstrap gap, it
/// just pays for it with a blocking sleep between its two reads instead of
/// spreading them across ticks.
fn read_iowait_percent(state: &mut Option<(u64, u64)>) -> anyhow::Result<f64> {
    let current = read_proc_stat_iowait()?;
    let value = iowait_ratio(*state, current);
    *state = Some(current);
    Ok(value)
}

fn iowait_ratio(prev: Option<(u64, u64)>, current: (u64, u64)) -> f64 {
    match prev {
        Some((prev_iowait, prev_total)) => {
            let iowait_delta = current.0.saturating_sub(prev_iowait);
            let total_delta = current.1.saturating_sub(prev_total);
            if total_delta == 0 {
                0.0
            } else {
                (iowait_delta as f64 / total_delta as f64) * 100.0
            }
        }
        None => 0.0,
    }
}

fn read_proc_stat_iowait() -> anyhow::Result<(u64, u64)> {
    let contents = std::fs::read_to_string("/proc/stat")?;
    let line = contents
        .lines()
        .find(|l| l.starts_with("cpu "))
        .ok_or_else(|| anyhow::anyhow!("no aggregate cpu line in /proc/stat"))?;

    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|s| s.parse().ok())
        .collect();

    let iowait = fields.get(4).copied().unwrap_or(0);
    let total: u64 = fields.iter().sum();
    Ok((iowait, total))
}

/// Shared handle so controllers and tests can read a sampler's value without
/// depending on `ConcurrencyController` (kept separate to avoid a reference
/// cycle — spec.md §9 "Graph structure": samplers hold a reference to their
/// controller's notifier, controllers hold no references to samplers).
pub type SharedSampler = Arc<LoadSampler>;
