use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Gate, GateError};
use crate::workload::{RequestData, SlotId};

/// Token-bucket admission gate (C1): average rate `1 / fill_period`, burst
/// `burst`. Strategy-stateless per slotId — `release` is a no-op.
pub struct RateGate {
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    fill_period: Duration,
    burst: u32,
}

impl RateGate {
    pub fn new(fill_period: Duration, burst: u32) -> Self {
        let burst_nz = NonZeroU32::new(burst.max(1)).expect("burst clamped to >= 1");
        // governor's Quota is rate-per-period; fill_period is the time to
        // replenish one token, so the per-second rate is its reciprocal.
        let quota = Quota::with_period(fill_period)
            .expect("fill_period must be non-zero")
            .allow_burst(burst_nz);
        Self {
            limiter: RateLimiter::direct(quota),
            fill_period,
            burst,
        }
    }
}

#[async_trait]
impl Gate for RateGate {
    async fn acquire(
        &self,
        cancel: &CancellationToken,
        slot_id: &SlotId,
        _data: &RequestData,
    ) -> Result<(), GateError> {
        tokio::select! {
            _ = self.limiter.until_ready() => {
                debug!(slot = %slot_id, "rate gate admitted");
                Ok(())
            }
            _ = cancel.cancelled() => Err(GateError::Cancelled),
        }
    }

    async fn release(&self, _slot_id: &SlotId) {}

    fn describe(&self) -> String {
        format!(
            "rate=1/{:?}, burst={}",
            self.fill_period, self.burst
        )
    }
}
