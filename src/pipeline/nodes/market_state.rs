//! Market state collection: OHLCV, funding, open interest and indicators
//! per candidate symbol, fanned out as parallel tasks.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::domain::market::IndicatorSet;
use crate::domain::state::CycleState;
use crate::error::Result;
use crate::market::MarketDataService;
use crate::pipeline::plugin::{NodeError, NodeMetadata, NodePlugin, PluginContext};
use crate::services::indicators;

pub fn metadata() -> NodeMetadata {
    NodeMetadata {
        name: "market_state".into(),
        display_name: "Market State".into(),
        category: "data_source".into(),
        insert_after: Some("coins_pick".into()),
        suggested_order: 2,
        requires_llm: false,
        requires_trader: true,
    }
}

pub fn constructor(_config: serde_json::Value) -> Result<Arc<dyn NodePlugin>> {
    Ok(Arc::new(MarketStateNode {
        metadata: metadata(),
    }))
}

struct MarketStateNode {
    metadata: NodeMetadata,
}

async fn collect_symbol(
    market: Arc<MarketDataService>,
    symbol: String,
    timeframes: Vec<(String, u32)>,
) -> Result<IndicatorSet> {
    let mut series = Vec::with_capacity(timeframes.len());
    for (timeframe, limit) in &timeframes {
        let candles = market.ohlcv(&symbol, timeframe, *limit).await?;
        series.push(candles);
    }

    let primary = series.first().cloned().unwrap_or_default();
    if primary.len() < indicators::MIN_CANDLES {
        return Err(crate::error::ConclaveError::MarketDataUnavailable(format!(
            "{}: only {} candles, need {}",
            symbol,
            primary.len(),
            indicators::MIN_CANDLES
        )));
    }
    let higher = series.get(1).map(|c| c.as_slice());

    let mut set = indicators::compute(&primary, higher);

    // Funding and open interest are best-effort context
    match market.funding_rate(&symbol).await {
        Ok(rate) => set.funding_rate = Some(rate),
        Err(e) => debug!(symbol = %symbol, "funding rate unavailable: {}", e),
    }
    match market.open_interest(&symbol).await {
        Ok(oi) => set.open_interest = Some(oi),
        Err(e) => debug!(symbol = %symbol, "open interest unavailable: {}", e),
    }

    Ok(set)
}

#[async_trait]
impl NodePlugin for MarketStateNode {
    fn metadata(&self) -> &NodeMetadata {
        &self.metadata
    }

    async fn run(
        &self,
        mut state: CycleState,
        ctx: &PluginContext,
    ) -> std::result::Result<CycleState, NodeError> {
        let timeframes: Vec<(String, u32)> = state
            .config_snapshot
            .timeframes
            .iter()
            .map(|tf| (tf.clone(), state.config_snapshot.ohlcv_limit(tf)))
            .collect();

        let mut tasks: JoinSet<(String, Result<IndicatorSet>)> = JoinSet::new();
        for symbol in state.symbols.clone() {
            let market = ctx.market.clone();
            let timeframes = timeframes.clone();
            tasks.spawn(async move {
                let result = collect_symbol(market, symbol.clone(), timeframes).await;
                (symbol, result)
            });
        }

        let mut failed: Vec<(String, String)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            if ctx.is_cancelled() {
                tasks.abort_all();
                return Err(NodeError::fatal("cancelled"));
            }
            match joined {
                Ok((symbol, Ok(set))) => {
                    if let Some(run) = state.runs.get_mut(&symbol) {
                        run.indicators = Some(set);
                    }
                }
                Ok((symbol, Err(e))) => failed.push((symbol, e.to_string())),
                Err(e) => warn!("market state task join error: {}", e),
            }
        }

        // A symbol without data is dropped; the cycle carries on
        for (symbol, reason) in failed {
            warn!(symbol = %symbol, "market data failed, symbol dropped: {}", reason);
            state.record_error("market_state", format!("{}: {}", symbol, reason));
            state.skip_symbol(&symbol, reason);
        }

        if state.symbols.is_empty() {
            state.record_error("market_state", "no symbols with usable market data");
        }
        Ok(state)
    }
}
