//! Default implementations of the external-collaborator traits
//! (`PolicySource`, `WorkloadSource`, `NodeTaints`) for a standalone run of
//! the daemon. The cluster-API watchers that would feed these from a real
//! cluster are explicitly out of scope (spec.md §1); a real deployment
//! wires the traits in `policy::source`, `workload::source`, and `node` to
//! its own cluster client instead of the stand-ins below.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::node::NodeTaints;
use crate::policy::source::PolicySource;
use crate::policy::WirePolicySpec;
use crate::workload::source::WorkloadSource;
use crate::workload::{SlotId, WorkloadHandle};

/// Policy source with no backing watch: installs no policy, ever. A node
/// running this daemon standalone has no throttling configured until it is
/// wired to a real cluster-API feed.
pub struct NoPolicySource;

#[async_trait]
impl PolicySource for NoPolicySource {
    async fn list_policies(&self) -> Vec<WirePolicySpec> {
        Vec::new()
    }

    async fn node_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    async fn changed(&self) {
        // No watch to observe; never resolves so the resolver's loop simply
        // waits on cancellation instead of busy-looping.
        std::future::pending::<()>().await;
    }
}

/// Workload source with no backing cache: every slot is unresolvable. A
/// `Wait` call against this source always reports `"Failed to get pod"`
/// once its deadline elapses, the same outcome spec.md §4.8 describes for a
/// genuinely absent workload.
pub struct NoWorkloadSource;

#[async_trait]
impl WorkloadSource for NoWorkloadSource {
    async fn lookup(&self, _slot_id: &SlotId) -> Option<WorkloadHandle> {
        None
    }

    async fn tracked_slot_ids(&self) -> Vec<SlotId> {
        Vec::new()
    }
}

/// Node-taints collaborator with no backing API client: reports no taints
/// present, so `remove_startup_taint` is always a no-op.
pub struct NoNodeTaints;

#[async_trait]
impl NodeTaints for NoNodeTaints {
    async fn list_taints(&self, _node_name: &str) -> anyhow::Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn remove_taint(&self, _node_name: &str, _taint_key: &str) -> anyhow::Result<()> {
        Ok(())
    }
}
