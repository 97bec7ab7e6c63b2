use async_trait::async_trait;
use tracing::info;

/// External collaborator: the node object in the cluster API (spec.md §1 —
/// out of scope, contract only).
#[async_trait]
pub trait NodeTaints: Send + Sync {
    async fn list_taints(&self, node_name: &str) -> anyhow::Result<Vec<String>>;
    async fn remove_taint(&self, node_name: &str, taint_key: &str) -> anyhow::Result<()>;
}

/// One-shot startup side effect (spec.md §6 "Startup side-effect"): removes
/// the configured taint from this node's record, signaling readiness to
/// accept workloads. Not retried; absence of the taint is not an error.
pub async fn remove_startup_taint(
    nodes: &dyn NodeTaints,
    node_name: &str,
    taint_key: &str,
) -> anyhow::Result<()> {
    if taint_key.is_empty() {
        info!("no taint-to-remove configured, no update required");
        return Ok(());
    }

    let taints = nodes.list_taints(node_name).await?;
    if !taints.iter().any(|t| t == taint_key) {
        info!(taint = taint_key, "taint not present on node, no update required");
        return Ok(());
    }

    nodes.remove_taint(node_name, taint_key).await?;
    info!(taint = taint_key, node = node_name, "removed startup taint");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct InMemoryNodeTaints {
        taints: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NodeTaints for InMemoryNodeTaints {
        async fn list_taints(&self, _node_name: &str) -> anyhow::Result<Vec<String>> {
            Ok(self.taints.lock().unwrap().clone())
        }

        async fn remove_taint(&self, _node_name: &str, taint_key: &str) -> anyhow::Result<()> {
            self.taints.lock().unwrap().retain(|t| t != taint_key);
            Ok(())
        }
    }

    #[tokio::test]
    async fn empty_taint_key_is_a_noop() {
        let nodes = InMemoryNodeTaints {
            taints: Mutex::new(vec!["pod-limiter".to_string()]),
        };
        remove_startup_taint(&nodes, "node-1", "").await.unwrap();
        assert_eq!(nodes.taints.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn absent_taint_is_a_noop() {
        let nodes = InMemoryNodeTaints::default();
        remove_startup_taint(&nodes, "node-1", "pod-limiter")
            .await
            .unwrap();
        assert!(nodes.taints.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn present_taint_is_removed() {
        let nodes = InMemoryNodeTaints {
            taints: Mutex::new(vec!["pod-limiter".to_string(), "other".to_string()]),
        };
        remove_startup_taint(&nodes, "node-1", "pod-limiter")
            .await
            .unwrap();
        let remaining = nodes.taints.lock().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0], "other");
    }
}
