use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::snapshot::GateSnapshot;
use super::{Gate, GateError};
use crate::workload::{RequestData, SlotId};

/// Composes the current gate list into a single strategy (C4, spec.md §4.4
/// "Strategy Chain"). Acquires in list order; on the first failure it
/// returns immediately without releasing gates already acquired earlier in
/// the chain — gates that did admit this slot keep counting it until a
/// matching `release` call, mirroring how the chain itself is released
/// (always walked end to end, regardless of which gates actually admitted).
pub struct StrategyChain {
    snapshot: Arc<GateSnapshot>,
}

impl StrategyChain {
    pub fn new(snapshot: Arc<GateSnapshot>) -> Self {
        Self { snapshot }
    }
}

#[async_trait]
impl Gate for StrategyChain {
    async fn acquire(
        &self,
        cancel: &CancellationToken,
        slot_id: &SlotId,
        data: &RequestData,
    ) -> Result<(), GateError> {
        let gates = self.snapshot.get();
        for gate in gates.iter() {
            gate.acquire(cancel, slot_id, data).await?;
        }
        Ok(())
    }

    async fn release(&self, slot_id: &SlotId) {
        let gates = self.snapshot.get();
        for gate in gates.iter().rev() {
            gate.release(slot_id).await;
        }
    }

    fn describe(&self) -> String {
        let gates = self.snapshot.get();
        let parts: Vec<String> = gates.iter().map(|g| g.describe()).collect();
        format!("chain[{}]", parts.join(", "))
    }
}
