//! Coin selection: rank the market catalogue and pick the cycle's
//! candidates.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::state::CycleState;
use crate::error::Result;
use crate::pipeline::plugin::{NodeError, NodeMetadata, NodePlugin, PluginContext};

pub fn metadata() -> NodeMetadata {
    NodeMetadata {
        name: "coins_pick".into(),
        display_name: "Coin Selection".into(),
        category: "data_source".into(),
        insert_after: None,
        suggested_order: 1,
        requires_llm: false,
        requires_trader: true,
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct CoinsPickConfig {
    /// Quote currencies eligible for selection
    quote_currencies: Vec<String>,
    /// Markets below this 24h quote volume are ignored
    min_quote_volume: f64,
}

impl Default for CoinsPickConfig {
    fn default() -> Self {
        Self {
            quote_currencies: vec!["USDT".into(), "USDC".into()],
            min_quote_volume: 0.0,
        }
    }
}

pub fn constructor(config: serde_json::Value) -> Result<Arc<dyn NodePlugin>> {
    let config: CoinsPickConfig = if config.is_null() {
        CoinsPickConfig::default()
    } else {
        serde_json::from_value(config)?
    };
    Ok(Arc::new(CoinsPickNode {
        metadata: metadata(),
        config,
    }))
}

struct CoinsPickNode {
    metadata: NodeMetadata,
    config: CoinsPickConfig,
}

#[async_trait]
impl NodePlugin for CoinsPickNode {
    fn metadata(&self) -> &NodeMetadata {
        &self.metadata
    }

    async fn run(
        &self,
        mut state: CycleState,
        ctx: &PluginContext,
    ) -> std::result::Result<CycleState, NodeError> {
        let cache_key = format!("bot_{}", state.bot_id);
        let limit = state.config_snapshot.max_concurrent_symbols;

        let mut selected: Vec<String> = match ctx
            .cache
            .get_as::<Vec<String>>("coin_selection", &cache_key)
        {
            Some(cached) => {
                debug!(count = cached.len(), "coin selection served from cache");
                cached
            }
            None => {
                let catalogue = ctx.market.markets().await?;
                let min_volume = rust_decimal::Decimal::try_from(self.config.min_quote_volume)
                    .unwrap_or_default();

                let mut ranked: Vec<_> = catalogue
                    .markets
                    .values()
                    .filter(|m| m.active)
                    .filter(|m| self.config.quote_currencies.contains(&m.quote))
                    .filter(|m| m.quote_volume_24h >= min_volume)
                    .collect();
                ranked.sort_by(|a, b| b.quote_volume_24h.cmp(&a.quote_volume_24h));

                let selected: Vec<String> = ranked
                    .into_iter()
                    .take(limit)
                    .map(|m| m.symbol.clone())
                    .collect();
                ctx.cache.set_as("coin_selection", &cache_key, &selected);
                selected
            }
        };
        selected.truncate(limit);

        // Symbols we hold positions in stay in play regardless of ranking
        for pos in &state.positions {
            if !selected.contains(&pos.symbol) {
                selected.push(pos.symbol.clone());
            }
        }

        info!(symbols = ?selected, "candidates selected");
        state.symbols = selected;
        state.ensure_runs();
        Ok(state)
    }
}
