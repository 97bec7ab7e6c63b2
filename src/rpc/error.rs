use crate::gate::GateError;

/// Label attached to the `pod_pacemaker_wait_failed{reason}` counter
/// (spec.md §6). Kept as a small closed set rather than the raw error
/// Display text so dashboards don't fragment on message wording.
pub fn failure_reason(err: &GateError) -> &'static str {
    match err {
        GateError::Cancelled => "failed_to_acquire_lock",
        GateError::SamplerClosed => "failed_to_acquire_lock",
        GateError::ConfigParse(_) => "failed_to_acquire_lock",
    }
}

/// Caller-facing message for an admission failure (spec.md §4.8 step 3).
/// Deliberately generic — internal error detail is logged, not returned.
pub fn failure_message(_err: &GateError) -> &'static str {
    "Failed to acquire lock in time"
}
