//! Pipeline runtime: workflow graphs of hot-swappable plugin nodes.

pub mod auto_sync;
pub mod condition;
pub mod graph;
pub mod nodes;
pub mod plugin;
pub mod registry;
pub mod runtime;

pub use graph::{ExecutablePlan, WorkflowEdge, WorkflowNode, WorkflowSpec, END_NODE, START_NODE};
pub use plugin::{NodeError, NodeFailureKind, NodeMetadata, NodePlugin, PluginContext};
pub use registry::PluginRegistry;
pub use runtime::PipelineRuntime;
