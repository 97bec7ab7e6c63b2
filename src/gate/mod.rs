pub mod chain;
pub mod concurrency;
pub mod rate;
pub mod sampler;
pub mod snapshot;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::workload::{RequestData, SlotId};

/// Error returned by a gate's `acquire`.
///
/// These map 1:1 onto the error kinds in spec.md §7; the RPC surface
/// collapses all of them into `{success=false, message}` plus a metric
/// label, never leaking this text to the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GateError {
    /// The calling context ended (deadline elapsed or caller disconnected)
    /// before the waiter was admitted.
    #[error("cancelled before admission")]
    Cancelled,
    /// The load sampler backing this gate's predicate has been shut down
    /// (its policy snapshot was replaced). In-flight waiters fail fast
    /// rather than hang forever.
    #[error("sampler closed")]
    SamplerClosed,
    /// A policy sub-block could not be parsed into gate parameters.
    #[error("config parse error: {0}")]
    ConfigParse(String),
}

/// A single admission strategy in the chain (spec.md §3 "Gate").
///
/// `acquire` may suspend the caller; `release` must not. Implementations
/// must be safe to call concurrently for disjoint and for identical
/// `slotId`s.
#[async_trait]
pub trait Gate: Send + Sync {
    async fn acquire(
        &self,
        cancel: &CancellationToken,
        slot_id: &SlotId,
        data: &RequestData,
    ) -> Result<(), GateError>;

    async fn release(&self, slot_id: &SlotId);

    /// Human-readable description for logs (e.g. `"rate=10/s, burst=5"`).
    fn describe(&self) -> String;
}
