//! Plugin auto-sync: propose registry-level node additions to workflows.
//!
//! When new plugins appear in the registry, workflows that have never been
//! hand-edited get the missing nodes appended (disabled, so routing is
//! unchanged until a human wires them). A workflow carrying the user-edit
//! marker is never touched.

use tracing::{debug, info};

use crate::adapters::store::Store;
use crate::error::Result;

use super::graph::{WorkflowNode, WorkflowSpec};
use super::registry::PluginRegistry;

#[derive(Debug, Clone, Default)]
pub struct AutoSyncStats {
    pub added: usize,
    pub skipped_user_edited: bool,
}

/// Reconcile the registry's node set into one workflow.
pub async fn sync_workflow(
    store: &dyn Store,
    registry: &PluginRegistry,
    workflow_id: i64,
) -> Result<AutoSyncStats> {
    let Some(mut spec) = store.get_workflow(workflow_id).await? else {
        debug!(workflow_id, "workflow not found, nothing to sync");
        return Ok(AutoSyncStats::default());
    };

    if spec.user_edited {
        debug!(workflow_id, "workflow is user-edited, auto-sync skipped");
        return Ok(AutoSyncStats {
            added: 0,
            skipped_user_edited: true,
        });
    }

    let added = append_missing_nodes(&mut spec, registry);
    if added > 0 {
        store.save_workflow(&spec).await?;
        info!(workflow_id, added, "auto-sync appended plugins");
    }

    Ok(AutoSyncStats {
        added,
        skipped_user_edited: false,
    })
}

/// Append registry plugins the spec does not reference yet. New nodes land
/// disabled after their `insert_after` anchor (or at the tail), so existing
/// routing is unaffected until a human enables them.
fn append_missing_nodes(spec: &mut WorkflowSpec, registry: &PluginRegistry) -> usize {
    let mut added = 0;
    let mut next_id = spec.nodes.iter().map(|n| n.id).max().unwrap_or(0) + 1;

    for metadata in registry.list() {
        if spec.nodes.iter().any(|n| n.plugin_name == metadata.name) {
            continue;
        }

        let execution_order = metadata
            .insert_after
            .as_ref()
            .and_then(|anchor| {
                spec.nodes
                    .iter()
                    .find(|n| n.plugin_name == *anchor)
                    .map(|n| n.execution_order + 1)
            })
            .unwrap_or_else(|| {
                spec.nodes
                    .iter()
                    .map(|n| n.execution_order)
                    .max()
                    .unwrap_or(metadata.suggested_order)
                    + 1
            });

        spec.nodes.push(WorkflowNode {
            id: next_id,
            name: metadata.name.clone(),
            plugin_name: metadata.name.clone(),
            execution_order,
            enabled: false,
            config: serde_json::Value::Null,
        });
        next_id += 1;
        added += 1;
    }

    added
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;
    use crate::pipeline::graph::linear_workflow;

    #[tokio::test]
    async fn test_sync_appends_missing_disabled() {
        let store = MemoryStore::new();
        let registry = PluginRegistry::with_builtins();

        // Workflow referencing only a subset of builtins
        store.seed_workflow(linear_workflow(
            1,
            "default",
            &["coins_pick", "market_state", "execution"],
        ));

        let stats = sync_workflow(&store, &registry, 1).await.unwrap();
        assert!(stats.added >= 4); // quant_filter, decisions, risk_monitor

        let spec = store.get_workflow(1).await.unwrap().unwrap();
        let appended = spec.node("quant_filter").expect("appended");
        assert!(!appended.enabled, "appended nodes must not change routing");
        // Original nodes untouched
        assert!(spec.node("coins_pick").unwrap().enabled);
    }

    #[tokio::test]
    async fn test_user_edited_workflow_untouched() {
        let store = MemoryStore::new();
        let registry = PluginRegistry::with_builtins();

        let mut spec = linear_workflow(2, "custom", &["coins_pick"]);
        spec.user_edited = true;
        let before = spec.clone();
        store.seed_workflow(spec);

        let stats = sync_workflow(&store, &registry, 2).await.unwrap();
        assert!(stats.skipped_user_edited);
        assert_eq!(stats.added, 0);

        let after = store.get_workflow(2).await.unwrap().unwrap();
        assert_eq!(after.nodes.len(), before.nodes.len());
        assert_eq!(after.version, before.version);
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let store = MemoryStore::new();
        let registry = PluginRegistry::with_builtins();
        store.seed_workflow(linear_workflow(3, "default", &["coins_pick"]));

        let first = sync_workflow(&store, &registry, 3).await.unwrap();
        let second = sync_workflow(&store, &registry, 3).await.unwrap();
        assert!(first.added > 0);
        assert_eq!(second.added, 0);
    }
}
