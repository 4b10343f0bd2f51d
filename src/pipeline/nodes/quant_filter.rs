//! Quant signal filter: weighted scoring drops weak symbols before any LLM
//! spend.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::domain::state::CycleState;
use crate::error::Result;
use crate::pipeline::plugin::{NodeError, NodeMetadata, NodePlugin, PluginContext};
use crate::services::quant;

pub fn metadata() -> NodeMetadata {
    NodeMetadata {
        name: "quant_filter".into(),
        display_name: "Quant Signal Filter".into(),
        category: "analysis".into(),
        insert_after: Some("market_state".into()),
        suggested_order: 3,
        requires_llm: false,
        requires_trader: false,
    }
}

pub fn constructor(_config: serde_json::Value) -> Result<Arc<dyn NodePlugin>> {
    Ok(Arc::new(QuantFilterNode {
        metadata: metadata(),
    }))
}

struct QuantFilterNode {
    metadata: NodeMetadata,
}

#[async_trait]
impl NodePlugin for QuantFilterNode {
    fn metadata(&self) -> &NodeMetadata {
        &self.metadata
    }

    async fn run(
        &self,
        mut state: CycleState,
        _ctx: &PluginContext,
    ) -> std::result::Result<CycleState, NodeError> {
        let weights = state.config_snapshot.quant_weights.clone();
        let threshold = state.config_snapshot.quant_threshold;

        let mut below: Vec<(String, f64)> = Vec::new();
        for symbol in state.symbols.clone() {
            let Some(run) = state.runs.get_mut(&symbol) else {
                continue;
            };
            let Some(indicators) = &run.indicators else {
                below.push((symbol, -1.0));
                continue;
            };

            let score = quant::score(indicators, &weights);
            let total = score.total;
            run.quant = Some(score);
            if total < threshold {
                below.push((symbol, total));
            }
        }

        // Symbols we already hold stay in the cycle so closes remain possible
        for (symbol, score) in below {
            if state.position_for(&symbol).is_some() {
                continue;
            }
            let reason = if score < 0.0 {
                "no indicator data for scoring".to_string()
            } else {
                format!("quant score {:.1} below threshold {:.1}", score, threshold)
            };
            state.skip_symbol(&symbol, reason);
        }

        info!(
            surviving = state.symbols.len(),
            threshold, "quant filter applied"
        );
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::{IndicatorSet, MacdValue};

    #[test]
    fn test_metadata_shape() {
        let m = metadata();
        assert_eq!(m.name, "quant_filter");
        assert_eq!(m.insert_after.as_deref(), Some("market_state"));
        assert!(!m.requires_llm);
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let ind = IndicatorSet {
            current_price: 105.0,
            rsi_14: 60.0,
            macd: MacdValue {
                macd: 1.0,
                signal: 0.5,
                histogram: 0.5,
            },
            ema_20: 100.0,
            volume_ratio: 1.6,
            htf_trend: 1,
            ..IndicatorSet::default()
        };
        let weights = crate::domain::bot::QuantWeights::default();
        let a = quant::score(&ind, &weights);
        let b = quant::score(&ind, &weights);
        assert_eq!(a.total, b.total);
    }
}
