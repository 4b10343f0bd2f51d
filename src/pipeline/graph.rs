//! Workflow graph model and validation.
//!
//! A workflow is a directed acyclic graph of plugin nodes. The implicit START
//! fans out to every node with no inbound edge and END fans in from every
//! terminal. The UI may rewrite the graph at any time; the runtime freezes a
//! snapshot at the start of each cycle, so in-flight cycles never observe
//! mid-cycle edits.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{ConclaveError, Result};

pub const START_NODE: &str = "START";
pub const END_NODE: &str = "END";

/// A node binds a plugin to a position in the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: i64,
    pub name: String,
    pub plugin_name: String,
    pub execution_order: i32,
    pub enabled: bool,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// An edge with an optional condition evaluated against CycleState.
/// Absence of a condition means unconditional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEdge {
    pub from_node: String,
    pub to_node: String,
    #[serde(default)]
    pub condition: Option<String>,
}

/// A workflow graph as stored durably.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub id: i64,
    pub name: String,
    pub version: i32,
    /// Set once a human edits the graph; auto-sync must never overwrite it
    pub user_edited: bool,
    pub nodes: Vec<WorkflowNode>,
    pub edges: Vec<WorkflowEdge>,
}

impl WorkflowSpec {
    pub fn node(&self, name: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Validate and freeze an executable snapshot.
    pub fn snapshot(&self) -> Result<ExecutablePlan> {
        ExecutablePlan::build(self)
    }
}

/// A frozen, validated execution plan for one cycle.
#[derive(Debug, Clone)]
pub struct ExecutablePlan {
    pub workflow_id: i64,
    pub workflow_name: String,
    pub version: i32,
    /// Enabled nodes in topological order (ties broken by execution_order)
    pub order: Vec<WorkflowNode>,
    /// Outbound edges per node name, including synthetic START edges
    pub edges_from: HashMap<String, Vec<WorkflowEdge>>,
    /// Nodes activated directly from START
    pub entry_nodes: Vec<String>,
}

impl ExecutablePlan {
    fn build(spec: &WorkflowSpec) -> Result<Self> {
        let enabled: Vec<&WorkflowNode> = spec.nodes.iter().filter(|n| n.enabled).collect();
        if enabled.is_empty() {
            return Err(ConclaveError::Workflow(format!(
                "workflow '{}' has no enabled nodes",
                spec.name
            )));
        }

        let names: HashSet<&str> = enabled.iter().map(|n| n.name.as_str()).collect();

        // Validate edge references; edges touching disabled nodes are dropped
        let mut edges: Vec<WorkflowEdge> = Vec::new();
        for edge in &spec.edges {
            let from_ok = edge.from_node == START_NODE || names.contains(edge.from_node.as_str());
            let to_ok = edge.to_node == END_NODE || names.contains(edge.to_node.as_str());
            if !from_ok || !to_ok {
                tracing::warn!(
                    from = %edge.from_node,
                    to = %edge.to_node,
                    "edge references unknown or disabled node, skipping"
                );
                continue;
            }
            if edge.from_node == edge.to_node {
                return Err(ConclaveError::Workflow(format!(
                    "workflow '{}': self-loop on '{}'",
                    spec.name, edge.from_node
                )));
            }
            edges.push(edge.clone());
        }

        // Implicit START: fan out to every node with no inbound edge
        let has_inbound: HashSet<&str> = edges
            .iter()
            .filter(|e| e.from_node != START_NODE)
            .map(|e| e.to_node.as_str())
            .collect();
        let explicit_entries: HashSet<&str> = edges
            .iter()
            .filter(|e| e.from_node == START_NODE)
            .map(|e| e.to_node.as_str())
            .collect();

        let mut entry_nodes: Vec<String> = enabled
            .iter()
            .filter(|n| !has_inbound.contains(n.name.as_str()) || explicit_entries.contains(n.name.as_str()))
            .map(|n| n.name.clone())
            .collect();
        entry_nodes.sort_by_key(|name| {
            enabled
                .iter()
                .find(|n| &n.name == name)
                .map(|n| n.execution_order)
                .unwrap_or(i32::MAX)
        });

        if entry_nodes.is_empty() {
            return Err(ConclaveError::Workflow(format!(
                "workflow '{}' has no entry nodes (cycle?)",
                spec.name
            )));
        }

        // Kahn's algorithm over the real nodes; cycles are forbidden
        let mut indegree: HashMap<&str, usize> =
            names.iter().map(|n| (*n, 0)).collect();
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &edges {
            if edge.from_node == START_NODE || edge.to_node == END_NODE {
                continue;
            }
            adjacency
                .entry(edge.from_node.as_str())
                .or_default()
                .push(edge.to_node.as_str());
            *indegree.entry(edge.to_node.as_str()).or_insert(0) += 1;
        }

        let mut ready: VecDeque<&str> = {
            let mut roots: Vec<&str> = indegree
                .iter()
                .filter(|(_, d)| **d == 0)
                .map(|(n, _)| *n)
                .collect();
            roots.sort_by_key(|name| {
                enabled
                    .iter()
                    .find(|n| n.name == *name)
                    .map(|n| n.execution_order)
                    .unwrap_or(i32::MAX)
            });
            roots.into()
        };

        let mut order: Vec<WorkflowNode> = Vec::with_capacity(enabled.len());
        while let Some(name) = ready.pop_front() {
            let node = enabled
                .iter()
                .find(|n| n.name == name)
                .expect("name came from enabled set");
            order.push((*node).clone());

            let mut unlocked: Vec<&str> = Vec::new();
            for &next in adjacency.get(name).into_iter().flatten() {
                let d = indegree.get_mut(next).expect("known node");
                *d -= 1;
                if *d == 0 {
                    unlocked.push(next);
                }
            }
            unlocked.sort_by_key(|n| {
                enabled
                    .iter()
                    .find(|x| x.name == *n)
                    .map(|x| x.execution_order)
                    .unwrap_or(i32::MAX)
            });
            for next in unlocked {
                ready.push_back(next);
            }
        }

        if order.len() != enabled.len() {
            return Err(ConclaveError::Workflow(format!(
                "workflow '{}' contains a cycle",
                spec.name
            )));
        }

        let mut edges_from: HashMap<String, Vec<WorkflowEdge>> = HashMap::new();
        for edge in edges {
            edges_from
                .entry(edge.from_node.clone())
                .or_default()
                .push(edge);
        }
        // Deterministic condition evaluation order: by target execution_order
        let order_of: HashMap<&str, i32> = enabled
            .iter()
            .map(|n| (n.name.as_str(), n.execution_order))
            .collect();
        for outbound in edges_from.values_mut() {
            outbound.sort_by_key(|e| {
                order_of
                    .get(e.to_node.as_str())
                    .copied()
                    .unwrap_or(i32::MAX)
            });
        }

        Ok(ExecutablePlan {
            workflow_id: spec.id,
            workflow_name: spec.name.clone(),
            version: spec.version,
            order,
            edges_from,
            entry_nodes,
        })
    }

    pub fn outbound(&self, node_name: &str) -> &[WorkflowEdge] {
        self.edges_from
            .get(node_name)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

/// A default linear workflow over the given plugin names, used when a bot has
/// no stored graph yet.
pub fn linear_workflow(id: i64, name: &str, plugin_names: &[&str]) -> WorkflowSpec {
    let nodes = plugin_names
        .iter()
        .enumerate()
        .map(|(i, plugin)| WorkflowNode {
            id: i as i64 + 1,
            name: plugin.to_string(),
            plugin_name: plugin.to_string(),
            execution_order: i as i32 + 1,
            enabled: true,
            config: serde_json::Value::Null,
        })
        .collect::<Vec<_>>();

    let mut edges = Vec::new();
    for pair in plugin_names.windows(2) {
        edges.push(WorkflowEdge {
            from_node: pair[0].to_string(),
            to_node: pair[1].to_string(),
            condition: None,
        });
    }

    WorkflowSpec {
        id,
        name: name.to_string(),
        version: 1,
        user_edited: false,
        nodes,
        edges,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, order: i32) -> WorkflowNode {
        WorkflowNode {
            id: order as i64,
            name: name.into(),
            plugin_name: name.into(),
            execution_order: order,
            enabled: true,
            config: serde_json::Value::Null,
        }
    }

    fn edge(from: &str, to: &str) -> WorkflowEdge {
        WorkflowEdge {
            from_node: from.into(),
            to_node: to.into(),
            condition: None,
        }
    }

    fn spec(nodes: Vec<WorkflowNode>, edges: Vec<WorkflowEdge>) -> WorkflowSpec {
        WorkflowSpec {
            id: 1,
            name: "test".into(),
            version: 1,
            user_edited: false,
            nodes,
            edges,
        }
    }

    #[test]
    fn test_linear_plan_orders_nodes() {
        let spec = linear_workflow(1, "default", &["a", "b", "c"]);
        let plan = spec.snapshot().unwrap();
        let names: Vec<&str> = plan.order.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(plan.entry_nodes, vec!["a".to_string()]);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let s = spec(
            vec![node("a", 1), node("b", 2)],
            vec![edge("a", "b"), edge("b", "a")],
        );
        let err = s.snapshot().unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_diamond_respects_execution_order() {
        // a -> (b, c) -> d, with c ordered before b
        let s = spec(
            vec![node("a", 1), node("c", 2), node("b", 3), node("d", 4)],
            vec![edge("a", "b"), edge("a", "c"), edge("b", "d"), edge("c", "d")],
        );
        let plan = s.snapshot().unwrap();
        let names: Vec<&str> = plan.order.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c", "b", "d"]);
    }

    #[test]
    fn test_disabled_node_dropped_with_edges() {
        let mut b = node("b", 2);
        b.enabled = false;
        let s = spec(
            vec![node("a", 1), b, node("c", 3)],
            vec![edge("a", "b"), edge("b", "c"), edge("a", "c")],
        );
        let plan = s.snapshot().unwrap();
        let names: Vec<&str> = plan.order.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert_eq!(plan.outbound("a").len(), 1);
    }

    #[test]
    fn test_multiple_entry_nodes_fan_out_from_start() {
        let s = spec(
            vec![node("a", 1), node("b", 2), node("c", 3)],
            vec![edge("a", "c"), edge("b", "c")],
        );
        let plan = s.snapshot().unwrap();
        assert_eq!(
            plan.entry_nodes,
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn test_empty_workflow_rejected() {
        let s = spec(vec![], vec![]);
        assert!(s.snapshot().is_err());
    }
}
