//! Multi-role debate decision node.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::debate::{run_debate, DebateSettings, RolePrompts};
use crate::domain::state::CycleState;
use crate::error::Result;
use crate::pipeline::plugin::{NodeError, NodeMetadata, NodePlugin, PluginContext};

pub fn metadata() -> NodeMetadata {
    NodeMetadata {
        name: "debate_decision".into(),
        display_name: "Multi-Role Debate Decision".into(),
        category: "decision".into(),
        insert_after: Some("quant_filter".into()),
        suggested_order: 5,
        requires_llm: true,
        requires_trader: false,
    }
}

pub fn constructor(config: serde_json::Value) -> Result<Arc<dyn NodePlugin>> {
    Ok(Arc::new(DebateDecisionNode {
        metadata: metadata(),
        config,
    }))
}

struct DebateDecisionNode {
    metadata: NodeMetadata,
    config: serde_json::Value,
}

#[async_trait]
impl NodePlugin for DebateDecisionNode {
    fn metadata(&self) -> &NodeMetadata {
        &self.metadata
    }

    async fn run(
        &self,
        mut state: CycleState,
        ctx: &PluginContext,
    ) -> std::result::Result<CycleState, NodeError> {
        if state.symbols.is_empty() {
            info!("no candidates, skipping debate");
            return Ok(state);
        }

        let settings = DebateSettings::from_context(ctx, &self.config);
        let prompts = RolePrompts::load(ctx.prompts_dir.as_deref());

        let outcome = run_debate(ctx, &state, &settings, &prompts)
            .await
            .map_err(NodeError::from)?;

        for d in &outcome.final_decision.decisions {
            if let Some(run) = state.runs.get_mut(&d.symbol) {
                run.decision = Some(d.clone());
            }
        }
        state.debate = Some(outcome);
        Ok(state)
    }
}
