//! Plugin registry: name -> constructor, populated at startup.
//!
//! An explicit value injected where needed, not a process-wide global. Node
//! constructors receive the node's opaque config map and return the plugin
//! instance used for the cycle.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{ConclaveError, Result};

use super::plugin::{NodeMetadata, NodePlugin};

pub type NodeConstructor =
    fn(serde_json::Value) -> Result<Arc<dyn NodePlugin>>;

pub struct PluginRegistry {
    plugins: HashMap<String, (NodeMetadata, NodeConstructor)>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            plugins: HashMap::new(),
        }
    }

    /// Registry pre-populated with every builtin node.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        super::nodes::register_builtins(&mut registry);
        registry
    }

    pub fn register(&mut self, metadata: NodeMetadata, constructor: NodeConstructor) {
        debug!(plugin = %metadata.name, "plugin registered");
        self.plugins
            .insert(metadata.name.clone(), (metadata, constructor));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    pub fn metadata(&self, name: &str) -> Option<&NodeMetadata> {
        self.plugins.get(name).map(|(m, _)| m)
    }

    /// All registered plugins ordered by suggested execution position.
    pub fn list(&self) -> Vec<&NodeMetadata> {
        let mut all: Vec<&NodeMetadata> = self.plugins.values().map(|(m, _)| m).collect();
        all.sort_by_key(|m| m.suggested_order);
        all
    }

    /// Instantiate a plugin for one cycle.
    pub fn create(&self, name: &str, config: serde_json::Value) -> Result<Arc<dyn NodePlugin>> {
        let (_, constructor) = self
            .plugins
            .get(name)
            .ok_or_else(|| ConclaveError::UnknownPlugin(name.to_string()))?;
        constructor(config)
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
