pub mod events;
pub mod source;

use std::fmt;

/// Stable per-workload identifier, conventionally `<namespace>/<name>`
/// (spec.md §3 "SlotId"). Keys every map in the concurrency controller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(String);

impl SlotId {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self(format!("{namespace}/{name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SlotId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Signed admission priority; higher activates earlier. Defaults to zero.
pub type Priority = i64;

/// Lifecycle phase of the workload backing a slot, as reported by the
/// cluster-API watcher. Only `started`/`terminated`/`succeeded`/`failed`
/// are consulted by the release rule in spec.md §4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

/// Opaque descriptor of the workload backing one slot (spec.md §3
/// "WorkloadHandle"). Carries only what the skip policy and release rule
/// need — container readiness and the owning controller kind.
#[derive(Debug, Clone)]
pub struct WorkloadHandle {
    pub slot_id: SlotId,
    pub owner_kind: Option<String>,
    pub phase: WorkloadPhase,
    pub containers_started: bool,
    pub containers_terminated: bool,
}

impl WorkloadHandle {
    /// True when the workload has reached a state where any slot it holds
    /// should be released (spec.md §4.7): all containers started, all
    /// containers terminated, or the phase is terminal.
    pub fn should_release_slot(&self) -> bool {
        self.containers_started
            || self.containers_terminated
            || matches!(self.phase, WorkloadPhase::Succeeded | WorkloadPhase::Failed)
    }

    pub fn is_daemonset_owned(&self) -> bool {
        self.owner_kind.as_deref() == Some("DaemonSet")
    }
}

/// Request-scoped data carried into a gate's `acquire` (spec.md §3).
#[derive(Debug, Clone)]
pub struct RequestData {
    pub priority: Priority,
    pub workload: Option<WorkloadHandle>,
}

impl Default for RequestData {
    fn default() -> Self {
        Self {
            priority: 0,
            workload: None,
        }
    }
}
