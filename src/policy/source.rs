use std::collections::BTreeMap;

use async_trait::async_trait;

use super::WirePolicySpec;

/// External collaborator: the cluster-API watch feeding policy objects and
/// this node's labels (spec.md §1 — out of scope, contract only). Returns
/// the wire-typed form — duration/decimal sub-block fields still
/// unparsed — so a malformed value is the caller's (`PolicyResolver`'s) to
/// detect and skip, not this trait's to reject.
#[async_trait]
pub trait PolicySource: Send + Sync {
    async fn list_policies(&self) -> Vec<WirePolicySpec>;
    async fn node_labels(&self) -> BTreeMap<String, String>;

    /// Resolves once any policy object or the node's labels changed since
    /// the last call that observed this signal (spec.md §4.6 "triggered on
    /// any add/update/delete of a policy object").
    async fn changed(&self);
}
