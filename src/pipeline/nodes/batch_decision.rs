//! Single-LLM batch decision: the non-debate decision path.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::debate::engine::{build_market_context, normalize_allocations, symbol_context};
use crate::debate::schema;
use crate::domain::decision::BatchDecision;
use crate::domain::state::CycleState;
use crate::error::Result;
use crate::llm::CompletionRequest;
use crate::pipeline::plugin::{NodeError, NodeMetadata, NodePlugin, PluginContext};

const SYSTEM_PROMPT: &str = "\
You are the sole decision maker of a crypto trading desk. Given market data, \
indicators, quant scores and the account state, emit one decision per \
candidate symbol (open_long, open_short, close_long, close_short or wait) \
respecting the hard risk constraints you are given. Keep symbol strings \
exactly as given.";

pub fn metadata() -> NodeMetadata {
    NodeMetadata {
        name: "batch_decision".into(),
        display_name: "Batch Decision".into(),
        category: "decision".into(),
        insert_after: Some("quant_filter".into()),
        suggested_order: 4,
        requires_llm: true,
        requires_trader: false,
    }
}

pub fn constructor(config: serde_json::Value) -> Result<Arc<dyn NodePlugin>> {
    Ok(Arc::new(BatchDecisionNode {
        metadata: metadata(),
        config,
    }))
}

struct BatchDecisionNode {
    metadata: NodeMetadata,
    config: serde_json::Value,
}

impl BatchDecisionNode {
    fn timeout(&self, ctx: &PluginContext) -> Duration {
        Duration::from_secs(
            self.config
                .get("timeout_secs")
                .and_then(|v| v.as_u64())
                .unwrap_or(ctx.debate_defaults.timeout_per_phase_secs),
        )
    }

    fn build_prompt(&self, state: &CycleState) -> String {
        let mut prompt = format!("Market overview:\n{}\n", build_market_context(state));

        prompt.push_str("\nCandidate symbols:\n");
        for symbol in &state.symbols {
            prompt.push_str(&format!("### {}\n{}\n", symbol, symbol_context(state, symbol)));
        }

        let limits = &state.config_snapshot.risk_limits;
        prompt.push_str(&format!(
            "\nHard constraints:\n\
             - total allocation cap: {:.0}%\n\
             - per-symbol cap: {:.0}%\n\
             - position size: ${} to ${}\n\
             - minimum risk/reward: {:.1}:1\n\
             - maximum leverage: {}x\n\n\
             Emit one decision per candidate symbol.",
            limits.max_total_allocation_pct,
            limits.max_single_allocation_pct,
            limits.min_position_size_usd,
            limits.max_position_size_usd,
            limits.min_risk_reward_ratio,
            limits.max_leverage,
        ));
        prompt
    }
}

#[async_trait]
impl NodePlugin for BatchDecisionNode {
    fn metadata(&self) -> &NodeMetadata {
        &self.metadata
    }

    async fn run(
        &self,
        mut state: CycleState,
        ctx: &PluginContext,
    ) -> std::result::Result<CycleState, NodeError> {
        if state.symbols.is_empty() {
            info!("no candidates, skipping decision");
            return Ok(state);
        }

        let chain = ctx.llm.chain_or_default(ctx.bot.llm_id).map_err(NodeError::from)?;
        let timeout = self.timeout(ctx);

        let request = CompletionRequest::new(self.build_prompt(&state))
            .with_system(SYSTEM_PROMPT)
            .with_schema(schema::batch_decision_schema())
            .with_timeout(timeout);

        let decision = match tokio::time::timeout(timeout, async {
            let value = chain.complete_cached(&ctx.prompt_cache, &request).await?;
            crate::llm::adapter::parse_structured::<BatchDecision>(value)
        })
        .await
        {
            Ok(Ok(decision)) => decision,
            Ok(Err(e)) => {
                warn!("batch decision failed, defaulting to wait: {}", e);
                state.record_error("batch_decision", e.to_string());
                BatchDecision::all_wait(&state.symbols, "decision failed, holding")
            }
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "batch decision timed out");
                state.record_error("batch_decision", "decision timed out");
                BatchDecision::all_wait(&state.symbols, "decision timed out, holding")
            }
        };

        let decision = normalize_allocations(decision, &state);
        info!(
            total_allocation = decision.total_allocation_pct,
            summary = %decision.summary(),
            "batch decision ready"
        );

        for d in &decision.decisions {
            if let Some(run) = state.runs.get_mut(&d.symbol) {
                run.decision = Some(d.clone());
            }
        }
        Ok(state)
    }
}
