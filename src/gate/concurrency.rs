use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::sampler::SharedSampler;
use super::{Gate, GateError};
use crate::workload::{Priority, RequestData, SlotId};

/// A predicate over the current active count. Returning `Ok(false)` means
/// "not yet, wait for a broadcast"; `Err` means the gate is permanently
/// unable to admit (e.g. its sampler was shut down) and every waiter should
/// fail fast.
pub trait Predicate: Send + Sync {
    fn evaluate(&self, active_count: usize) -> Result<bool, GateError>;
}

/// Static `active < limit` predicate (spec.md §4.2 "Static concurrency
/// limit").
struct StaticLimit {
    limit: usize,
}

impl Predicate for StaticLimit {
    fn evaluate(&self, active_count: usize) -> Result<bool, GateError> {
        Ok(active_count < self.limit)
    }
}

/// `currentValue(sampler) < ceiling` predicate, erroring once the sampler
/// has been closed (spec.md §4.3).
struct LoadCeiling {
    sampler: SharedSampler,
    ceiling: f64,
    closed: Arc<AtomicBool>,
}

impl Predicate for LoadCeiling {
    fn evaluate(&self, _active_count: usize) -> Result<bool, GateError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(GateError::SamplerClosed);
        }
        Ok(self.sampler.current() < self.ceiling)
    }
}

/// Waiter record kept in the inflight heap, ordered by descending priority
/// then ascending arrival order (spec.md §4.2 "Priority policy" — the
/// heap-variant resolution of the Open Question in spec.md §9).
struct InflightItem {
    slot_id: SlotId,
    priority: Priority,
    sequence: u64,
}

impl PartialEq for InflightItem {
    fn eq(&self, other: &Self) -> bool {
        self.slot_id == other.slot_id
    }
}
impl Eq for InflightItem {}

impl PartialOrd for InflightItem {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for InflightItem {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap: higher priority first, and for equal
        // priority, earlier arrival (smaller sequence) wins — so invert the
        // sequence comparison.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

struct State {
    active: HashSet<SlotId>,
    inflight: BinaryHeap<InflightItem>,
}

/// Priority-aware, predicate-gated, cancellable admission controller — the
/// central algorithm of this crate (C2, spec.md §4.2).
///
/// Cloning is cheap: `Arc<ConcurrencyController>` is the unit callers hold.
pub struct ConcurrencyController {
    state: Mutex<State>,
    notify: Notify,
    predicate: Box<dyn Predicate>,
    on_acquire: Box<dyn Fn() + Send + Sync>,
    description: String,
    next_sequence: AtomicU64,
    /// Set once a backing load sampler shuts down (spec.md §4.3). Unused
    /// (always false) for controllers with no sampler behind them.
    closed: Arc<AtomicBool>,
}

impl ConcurrencyController {
    fn new_with_closed_flag(
        predicate: Box<dyn Predicate>,
        on_acquire: Box<dyn Fn() + Send + Sync>,
        description: String,
        closed: Arc<AtomicBool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                active: HashSet::new(),
                inflight: BinaryHeap::new(),
            }),
            notify: Notify::new(),
            predicate,
            on_acquire,
            description,
            next_sequence: AtomicU64::new(0),
            closed,
        })
    }

    pub fn new(
        predicate: Box<dyn Predicate>,
        on_acquire: Box<dyn Fn() + Send + Sync>,
        description: String,
    ) -> Arc<Self> {
        Self::new_with_closed_flag(
            predicate,
            on_acquire,
            description,
            Arc::new(AtomicBool::new(false)),
        )
    }

    /// Convenience constructor for the static limit (spec.md §4.2):
    /// `limit = max(1, ceil(perCore * cpuCount))` when
    /// `absolute == 0 && perCore > 0`, else `limit = absolute`.
    pub fn with_static_limit(absolute: u32, per_core: f64, cpu_count: usize) -> Arc<Self> {
        let limit = if absolute == 0 && per_core > 0.0 {
            (per_core * cpu_count as f64).ceil() as u32
        } else {
            absolute
        };
        let limit = limit.max(1) as usize;
        let description = format!("maxConcurrent={limit}");
        Self::new(Box::new(StaticLimit { limit }), Box::new(|| {}), description)
    }

    /// Convenience constructor for a load-based controller (spec.md §4.3):
    /// predicate reads `sampler`, optional `increment_by` inflates the
    /// sampled value on each acquisition.
    pub fn with_load_predicate(
        sampler: SharedSampler,
        ceiling: f64,
        increment_by: f64,
        description: String,
    ) -> Arc<Self> {
        let closed = Arc::new(AtomicBool::new(false));
        let predicate = LoadCeiling {
            sampler: sampler.clone(),
            ceiling,
            closed: closed.clone(),
        };
        let on_acquire: Box<dyn Fn() + Send + Sync> = if increment_by > 0.0 {
            Box::new(move || sampler.inflate(increment_by))
        } else {
            Box::new(|| {})
        };
        Self::new_with_closed_flag(Box::new(predicate), on_acquire, description, closed)
    }

    /// Signal that this controller's predicate should henceforth return
    /// `SamplerClosed` (spec.md §4.3 "On shutdown ... signals its
    /// controller's predicate to henceforth return an error").
    pub fn close_predicate(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// External hook for load samplers: wake all waiters because the
    /// predicate's inputs changed, without mutating `active` (spec.md
    /// §4.2 "notify()").
    pub fn notify(&self) {
        self.notify.notify_waiters();
    }

    /// Number of slots currently active, for observability and tests.
    pub async fn active_count(&self) -> usize {
        self.state.lock().await.active.len()
    }

    /// Enumerate currently active slots (used by the workload event handler
    /// to drive reconciliation, spec.md §4.7).
    pub async fn active_slots(&self) -> Vec<SlotId> {
        self.state.lock().await.active.iter().cloned().collect()
    }

    fn is_top_of_heap(state: &State, slot_id: &SlotId) -> bool {
        match state.inflight.peek() {
            Some(top) => &top.slot_id == slot_id,
            None => false,
        }
    }
}

#[async_trait]
impl Gate for ConcurrencyController {
    async fn acquire(
        &self,
        cancel: &CancellationToken,
        slot_id: &SlotId,
        data: &RequestData,
    ) -> Result<(), GateError> {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);

        loop {
            let mut state = self.state.lock().await;

            // Invariant: idempotent acquire for an already-active slot.
            if state.active.contains(slot_id) {
                return Ok(());
            }

            if cancel.is_cancelled() {
                state.inflight.retain(|i| &i.slot_id != slot_id);
                drop(state);
                self.notify.notify_waiters();
                return Err(GateError::Cancelled);
            }

            // Register (or re-register) this waiter's inflight record.
            if !state.inflight.iter().any(|i| &i.slot_id == slot_id) {
                state.inflight.push(InflightItem {
                    slot_id: slot_id.clone(),
                    priority: data.priority,
                    sequence,
                });
            }

            // Only the current top of the heap may attempt admission — this
            // is what gives the priority property across arbitrary wake
            // schedules (spec.md §4.2).
            if Self::is_top_of_heap(&state, slot_id) {
                match self.predicate.evaluate(state.active.len()) {
                    Err(e) => {
                        state.inflight.retain(|i| &i.slot_id != slot_id);
                        drop(state);
                        self.notify.notify_waiters();
                        return Err(e);
                    }
                    Ok(true) => {
                        state.inflight.retain(|i| &i.slot_id != slot_id);
                        state.active.insert(slot_id.clone());
                        drop(state);
                        (self.on_acquire)();
                        self.notify.notify_waiters();
                        debug!(slot = %slot_id, "concurrency controller admitted");
                        return Ok(());
                    }
                    Ok(false) => {}
                }
            }

            // Register for the next wake-up before releasing the lock, so a
            // release()/notify() racing with us right here is never missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            drop(state);

            tokio::select! {
                _ = notified => {}
                _ = cancel.cancelled() => {
                    let mut state = self.state.lock().await;
                    state.inflight.retain(|i| &i.slot_id != slot_id);
                    drop(state);
                    self.notify.notify_waiters();
                    return Err(GateError::Cancelled);
                }
            }
        }
    }

    async fn release(&self, slot_id: &SlotId) {
        let mut state = self.state.lock().await;
        if state.active.remove(slot_id) {
            drop(state);
            self.notify.notify_waiters();
        }
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn data(priority: Priority) -> RequestData {
        RequestData {
            priority,
            workload: None,
        }
    }

    #[tokio::test]
    async fn duplicate_acquire_on_active_slot_is_idempotent() {
        let controller = ConcurrencyController::with_static_limit(1, 0.0, 1);
        let cancel = CancellationToken::new();
        let slot = SlotId::from("ns/a".to_string());

        controller.acquire(&cancel, &slot, &data(0)).await.unwrap();
        assert_eq!(controller.active_count().await, 1);

        // A second acquire for the same slot must not re-enter the queue or
        // double-count against the limit.
        controller.acquire(&cancel, &slot, &data(0)).await.unwrap();
        assert_eq!(controller.active_count().await, 1);
    }

    #[tokio::test]
    async fn third_waiter_blocks_until_a_release() {
        let controller = ConcurrencyController::with_static_limit(2, 0.0, 1);
        let cancel = CancellationToken::new();
        let a = SlotId::from("ns/a".to_string());
        let b = SlotId::from("ns/b".to_string());
        let c = SlotId::from("ns/c".to_string());

        controller.acquire(&cancel, &a, &data(0)).await.unwrap();
        controller.acquire(&cancel, &b, &data(0)).await.unwrap();
        assert_eq!(controller.active_count().await, 2);

        let controller2 = controller.clone();
        let cancel2 = cancel.clone();
        let c2 = c.clone();
        let waiter = tokio::spawn(async move {
            controller2.acquire(&cancel2, &c2, &data(0)).await
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());

        controller.release(&a).await;
        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should resolve after release")
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(controller.active_count().await, 2);
    }

    #[tokio::test]
    async fn higher_priority_waiter_admitted_before_lower_priority_one() {
        let controller = ConcurrencyController::with_static_limit(1, 0.0, 1);
        let cancel = CancellationToken::new();
        let holder = SlotId::from("ns/holder".to_string());
        let low = SlotId::from("ns/low".to_string());
        let high = SlotId::from("ns/high".to_string());

        controller
            .acquire(&cancel, &holder, &data(0))
            .await
            .unwrap();

        // Low-priority waiter queues first...
        let controller_low = controller.clone();
        let cancel_low = cancel.clone();
        let low2 = low.clone();
        let low_waiter =
            tokio::spawn(async move { controller_low.acquire(&cancel_low, &low2, &data(1)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // ...then a higher-priority waiter arrives second.
        let controller_high = controller.clone();
        let cancel_high = cancel.clone();
        let high2 = high.clone();
        let high_waiter = tokio::spawn(async move {
            controller_high.acquire(&cancel_high, &high2, &data(10)).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        controller.release(&holder).await;

        let high_result = tokio::time::timeout(Duration::from_secs(1), high_waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(high_result.is_ok());
        assert!(!low_waiter.is_finished());

        controller.release(&high).await;
        let low_result = tokio::time::timeout(Duration::from_secs(1), low_waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(low_result.is_ok());
    }

    #[tokio::test]
    async fn cancelling_a_queued_non_top_waiter_does_not_disturb_others() {
        let controller = ConcurrencyController::with_static_limit(1, 0.0, 1);
        let holder_cancel = CancellationToken::new();
        let holder = SlotId::from("ns/holder".to_string());
        controller
            .acquire(&holder_cancel, &holder, &data(0))
            .await
            .unwrap();

        let victim_cancel = CancellationToken::new();
        let victim = SlotId::from("ns/victim".to_string());
        let controller_v = controller.clone();
        let victim_cancel2 = victim_cancel.clone();
        let victim2 = victim.clone();
        let victim_waiter = tokio::spawn(async move {
            controller_v.acquire(&victim_cancel2, &victim2, &data(0)).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let survivor_cancel = CancellationToken::new();
        let survivor = SlotId::from("ns/survivor".to_string());
        let controller_s = controller.clone();
        let survivor_cancel2 = survivor_cancel.clone();
        let survivor2 = survivor.clone();
        let survivor_waiter = tokio::spawn(async move {
            controller_s.acquire(&survivor_cancel2, &survivor2, &data(0)).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        victim_cancel.cancel();
        let victim_result = tokio::time::timeout(Duration::from_secs(1), victim_waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(victim_result, Err(GateError::Cancelled));

        controller.release(&holder).await;
        let survivor_result = tokio::time::timeout(Duration::from_secs(1), survivor_waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(survivor_result.is_ok());
    }

    #[tokio::test]
    async fn release_of_unknown_slot_is_a_noop() {
        let controller = ConcurrencyController::with_static_limit(1, 0.0, 1);
        let slot = SlotId::from("ns/nobody-home".to_string());
        controller.release(&slot).await;
        assert_eq!(controller.active_count().await, 0);
    }

    #[tokio::test]
    async fn closed_predicate_fails_waiters_fast() {
        let sampler = Arc::new(super::super::sampler::LoadSampler::new(
            super::super::sampler::LoadKind::Cpu,
        ));
        let controller =
            ConcurrencyController::with_load_predicate(sampler, 50.0, 0.0, "load".to_string());
        let cancel = CancellationToken::new();
        let slot = SlotId::from("ns/a".to_string());

        controller.close_predicate();
        let result = controller.acquire(&cancel, &slot, &data(0)).await;
        assert_eq!(result, Err(GateError::SamplerClosed));
    }
}
