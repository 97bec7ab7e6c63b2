use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::source::PolicySource;
use super::ThrottleConfig;
use crate::gate::concurrency::ConcurrencyController;
use crate::gate::rate::RateGate;
use crate::gate::sampler::{LoadKind, LoadSampler};
use crate::gate::snapshot::GateSnapshot;
use crate::gate::Gate;
use crate::workload::events::ActiveSlotRegistry;

/// Rebuilds the installed gate list whenever a policy object changes (C6,
/// spec.md §4.6). Selects the highest-priority policy whose node selector
/// matches this node, builds its gates in canonical order, and installs
/// them into `snapshot`/`registry` atomically. Closes the previous
/// generation's sampler tasks before building the new one — they are wired
/// to a `CancellationToken` that is swapped, never shared, across
/// generations.
pub struct PolicyResolver {
    source: Arc<dyn PolicySource>,
    snapshot: Arc<GateSnapshot>,
    registry: Arc<ActiveSlotRegistry>,
    cpu_count: usize,
    sample_interval: Duration,
    current_generation: Mutex<Option<CancellationToken>>,
}

impl PolicyResolver {
    pub fn new(
        source: Arc<dyn PolicySource>,
        snapshot: Arc<GateSnapshot>,
        registry: Arc<ActiveSlotRegistry>,
        cpu_count: usize,
        sample_interval: Duration,
    ) -> Self {
        Self {
            source,
            snapshot,
            registry,
            cpu_count: cpu_count.max(1),
            sample_interval,
            current_generation: Mutex::new(None),
        }
    }

    /// Recompute and install the active gate list (spec.md §4.6 steps 1-5).
    pub async fn resolve_once(&self) {
        let wire_policies = self.source.list_policies().await;

        // Step 4: a policy whose throttle config fails to parse is logged
        // and skipped — it never reaches selection, and every other policy
        // is still evaluated (spec.md §4.6 step 4 / §7 `CONFIG_PARSE`).
        let mut policies = Vec::with_capacity(wire_policies.len());
        for wire in wire_policies {
            match super::parse_policy(&wire) {
                Ok(policy) => policies.push(policy),
                Err(error) => {
                    warn!(policy = %wire.name, %error, "skipping policy with malformed throttle config");
                }
            }
        }
        // Stable sort by priority descending — ties keep source order.
        policies.sort_by(|a, b| b.priority.cmp(&a.priority));

        let node_labels = self.source.node_labels().await;
        let matching = policies
            .iter()
            .find(|p| super::selector_matches(&p.node_selector, &node_labels))
            .cloned();

        // Retire the previous generation's samplers before building the new
        // one — matches the original's "close, then rebuild" ordering.
        if let Some(prev) = self.current_generation.lock().unwrap().take() {
            prev.cancel();
        }
        let generation = CancellationToken::new();

        let (gates, controllers) = match &matching {
            None => {
                info!("no policy matches this node, installing empty gate list");
                (Vec::new(), Vec::new())
            }
            Some(policy) => {
                info!(policy = %policy.name, "installing policy");
                self.build_gates(&policy.throttle_config, &generation)
            }
        };

        self.snapshot.set(gates);
        self.registry.set(controllers);
        *self.current_generation.lock().unwrap() = Some(generation);
    }

    /// Run `resolve_once` once at startup, then again every time the
    /// source reports a change, until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        self.resolve_once().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = self.source.changed() => self.resolve_once().await,
            }
        }
    }

    fn build_gates(
        &self,
        config: &ThrottleConfig,
        generation: &CancellationToken,
    ) -> (Vec<Arc<dyn Gate>>, Vec<Arc<ConcurrencyController>>) {
        let mut gates: Vec<Arc<dyn Gate>> = Vec::new();
        let mut controllers: Vec<Arc<ConcurrencyController>> = Vec::new();

        // Canonical order (spec.md §4.4): Rate, Concurrency, Load-avg, CPU, I/O.
        if let Some(rate) = &config.rate_limit {
            let gate: Arc<dyn Gate> = Arc::new(RateGate::new(rate.fill_period, rate.burst));
            info!(gate = %gate.describe(), "gate installed");
            gates.push(gate);
        }

        if let Some(max_concurrent) = &config.max_concurrent {
            if max_concurrent.absolute > 0 || max_concurrent.per_core > 0.0 {
                let controller = ConcurrencyController::with_static_limit(
                    max_concurrent.absolute,
                    max_concurrent.per_core,
                    self.cpu_count,
                );
                info!(gate = %controller.describe(), "gate installed");
                controllers.push(controller.clone());
                gates.push(controller);
            }
        }

        if let Some(load_avg) = &config.load_avg {
            let sampler = Arc::new(LoadSampler::new(LoadKind::LoadAverage {
                per_core: load_avg.per_core,
            }));
            let description = format!("loadAvg<{}", load_avg.max_load);
            let controller = ConcurrencyController::with_load_predicate(
                sampler.clone(),
                load_avg.max_load,
                load_avg.increment_by,
                description,
            );
            sampler.spawn(controller.clone(), self.sample_interval, generation.clone());
            info!(gate = %controller.describe(), "gate installed");
            controllers.push(controller.clone());
            gates.push(controller);
        }

        if let Some(cpu) = &config.cpu {
            let sampler = Arc::new(LoadSampler::new(LoadKind::Cpu));
            let description = format!("cpu<{}", cpu.max_load);
            let controller = ConcurrencyController::with_load_predicate(
                sampler.clone(),
                cpu.max_load,
                cpu.increment_by,
                description,
            );
            sampler.spawn(controller.clone(), self.sample_interval, generation.clone());
            info!(gate = %controller.describe(), "gate installed");
            controllers.push(controller.clone());
            gates.push(controller);
        }

        if let Some(io) = &config.io {
            let sampler = Arc::new(LoadSampler::new(LoadKind::IoWait));
            let description = format!("io<{}", io.max_load);
            let controller = ConcurrencyController::with_load_predicate(
                sampler.clone(),
                io.max_load,
                io.increment_by,
                description,
            );
            sampler.spawn(controller.clone(), self.sample_interval, generation.clone());
            info!(gate = %controller.describe(), "gate installed");
            controllers.push(controller.clone());
            gates.push(controller);
        }

        if gates.is_empty() {
            info!("policy matched but no throttle sub-blocks were enabled");
        }

        (gates, controllers)
    }
}
