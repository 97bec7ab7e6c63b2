use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{SlotId, WorkloadHandle};

/// External collaborator: the local workload cache fed by the cluster-API
/// watcher (spec.md §1 — deliberately out of scope here, only its contract
/// appears). `Wait` resolves a slot against this on the hot path; the
/// reconciliation sweep (C7) enumerates it wholesale.
#[async_trait]
pub trait WorkloadSource: Send + Sync {
    async fn lookup(&self, slot_id: &SlotId) -> Option<WorkloadHandle>;

    /// All slotIds the cache currently knows about, used to recover from
    /// missed delete events (spec.md §4.7).
    async fn tracked_slot_ids(&self) -> Vec<SlotId>;
}

/// Poll `source` with a short fixed backoff until it reports the workload or
/// `cancel` ends (spec.md §4.8 step 1: "poll the local workload cache with a
/// short backoff up to the caller's deadline").
pub async fn resolve_with_backoff(
    source: &dyn WorkloadSource,
    slot_id: &SlotId,
    cancel: &CancellationToken,
    poll_interval: Duration,
) -> Option<WorkloadHandle> {
    loop {
        if let Some(handle) = source.lookup(slot_id).await {
            return Some(handle);
        }
        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = cancel.cancelled() => return None,
        }
    }
}

#[cfg(test)]
pub mod test_double {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    /// In-memory stand-in for the cluster-API-backed workload cache.
    #[derive(Default)]
    pub struct InMemoryWorkloadSource {
        handles: Mutex<HashMap<SlotId, WorkloadHandle>>,
    }

    impl InMemoryWorkloadSource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, handle: WorkloadHandle) {
            self.handles
                .lock()
                .unwrap()
                .insert(handle.slot_id.clone(), handle);
        }

        pub fn remove(&self, slot_id: &SlotId) {
            self.handles.lock().unwrap().remove(slot_id);
        }
    }

    #[async_trait]
    impl WorkloadSource for InMemoryWorkloadSource {
        async fn lookup(&self, slot_id: &SlotId) -> Option<WorkloadHandle> {
            self.handles.lock().unwrap().get(slot_id).cloned()
        }

        async fn tracked_slot_ids(&self) -> Vec<SlotId> {
            self.handles.lock().unwrap().keys().cloned().collect()
        }
    }
}
