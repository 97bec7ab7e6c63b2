use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::source::WorkloadSource;
use super::{SlotId, WorkloadHandle};
use crate::gate::concurrency::ConcurrencyController;
use crate::gate::Gate;

/// Default interval between reconciliation sweeps (spec.md §4.7: "every
/// 10 s").
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(10);

/// Union of `active_slots()` across every concurrency-style gate currently
/// installed (there may be more than one — a static cap plus one
/// load-based controller per enabled resource). Swapped wholesale by the
/// policy resolver alongside the gate snapshot itself.
pub struct ActiveSlotRegistry {
    controllers: RwLock<Arc<Vec<Arc<ConcurrencyController>>>>,
}

impl ActiveSlotRegistry {
    pub fn new() -> Self {
        Self {
            controllers: RwLock::new(Arc::new(Vec::new())),
        }
    }

    pub fn set(&self, controllers: Vec<Arc<ConcurrencyController>>) {
        let mut guard = self.controllers.write().expect("registry lock poisoned");
        *guard = Arc::new(controllers);
    }

    pub async fn active_slots(&self) -> HashSet<SlotId> {
        let controllers = self.controllers.read().expect("registry lock poisoned").clone();
        let mut all = HashSet::new();
        for controller in controllers.iter() {
            all.extend(controller.active_slots().await);
        }
        all
    }
}

impl Default for ActiveSlotRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Translates workload lifecycle events into slot releases and runs the
/// periodic reconciliation sweep (C7, spec.md §4.7). Holds no slot state of
/// its own — everything it needs is read from `registry` and `source`.
pub struct WorkloadEventHandler {
    chain: Arc<dyn Gate>,
    registry: Arc<ActiveSlotRegistry>,
    source: Arc<dyn WorkloadSource>,
}

impl WorkloadEventHandler {
    pub fn new(
        chain: Arc<dyn Gate>,
        registry: Arc<ActiveSlotRegistry>,
        source: Arc<dyn WorkloadSource>,
    ) -> Self {
        Self {
            chain,
            registry,
            source,
        }
    }

    /// Workload add/update event (spec.md §4.7): release only if the slot is
    /// active and the workload has reached a release-worthy state.
    pub async fn on_add_or_update(&self, handle: &WorkloadHandle) {
        if !handle.should_release_slot() {
            return;
        }
        let active = self.registry.active_slots().await;
        if active.contains(&handle.slot_id) {
            debug!(slot = %handle.slot_id, "releasing on workload update");
            self.chain.release(&handle.slot_id).await;
        }
    }

    /// Workload delete event: release unconditionally (the gate itself is a
    /// no-op for slots it doesn't hold).
    pub async fn on_delete(&self, slot_id: &SlotId) {
        debug!(slot = %slot_id, "releasing on workload delete");
        self.chain.release(slot_id).await;
    }

    /// One reconciliation pass: release any active slot whose workload is no
    /// longer tracked (spec.md §8 property 8 — the recovery path for missed
    /// delete events).
    pub async fn reconcile_once(&self) {
        let active = self.registry.active_slots().await;
        if active.is_empty() {
            return;
        }
        let tracked: HashSet<SlotId> = self.source.tracked_slot_ids().await.into_iter().collect();
        for slot_id in active.difference(&tracked) {
            info!(slot = %slot_id, "reconciliation releasing orphaned slot");
            self.chain.release(slot_id).await;
        }
    }

    pub fn spawn_reconciliation(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick is immediate, skip it
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => self.reconcile_once().await,
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::chain::StrategyChain;
    use crate::gate::snapshot::GateSnapshot;
    use crate::workload::source::test_double::InMemoryWorkloadSource;
    use crate::workload::{RequestData, WorkloadPhase};

    fn handle(slot_id: SlotId, started: bool) -> WorkloadHandle {
        WorkloadHandle {
            slot_id,
            owner_kind: None,
            phase: WorkloadPhase::Running,
            containers_started: started,
            containers_terminated: false,
        }
    }

    async fn setup() -> (Arc<WorkloadEventHandler>, Arc<ConcurrencyController>) {
        let controller = ConcurrencyController::with_static_limit(1, 0.0, 1);
        let snapshot = Arc::new(GateSnapshot::new());
        snapshot.set(vec![controller.clone()]);
        let chain: Arc<dyn Gate> = Arc::new(StrategyChain::new(snapshot));
        let registry = Arc::new(ActiveSlotRegistry::new());
        registry.set(vec![controller.clone()]);
        let source = Arc::new(InMemoryWorkloadSource::new());
        let handler = Arc::new(WorkloadEventHandler::new(chain, registry, source));
        (handler, controller)
    }

    #[tokio::test]
    async fn release_on_update_only_when_started() {
        let (handler, controller) = setup().await;
        let cancel = CancellationToken::new();
        let slot = SlotId::from("ns/a".to_string());
        controller
            .acquire(&cancel, &slot, &RequestData::default())
            .await
            .unwrap();

        handler.on_add_or_update(&handle(slot.clone(), false)).await;
        assert_eq!(controller.active_count().await, 1);

        handler.on_add_or_update(&handle(slot.clone(), true)).await;
        assert_eq!(controller.active_count().await, 0);
    }

    #[tokio::test]
    async fn delete_releases_unconditionally() {
        let (handler, controller) = setup().await;
        let cancel = CancellationToken::new();
        let slot = SlotId::from("ns/a".to_string());
        controller
            .acquire(&cancel, &slot, &RequestData::default())
            .await
            .unwrap();

        handler.on_delete(&slot).await;
        assert_eq!(controller.active_count().await, 0);
    }

    #[tokio::test]
    async fn reconciliation_releases_untracked_active_slots() {
        let (handler, controller) = setup().await;
        let cancel = CancellationToken::new();
        let slot = SlotId::from("ns/orphan".to_string());
        controller
            .acquire(&cancel, &slot, &RequestData::default())
            .await
            .unwrap();

        // Workload source has no record of this slot at all.
        handler.reconcile_once().await;
        assert_eq!(controller.active_count().await, 0);
    }
}
