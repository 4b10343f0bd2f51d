//! Pipeline runtime: executes a frozen workflow plan over one CycleState.
//!
//! Nodes run in topological order. After each node completes the state is
//! checkpointed under `(thread_id, cycle_id, node_name)`; rewinding to any
//! key replays exactly what the next node would have seen. Recoverable node
//! failures are recorded and the graph continues along the default edges;
//! fatal failures abort the cycle. A stop signal aborts the in-flight node
//! at its next suspension point and nothing further is checkpointed.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::adapters::checkpoint::CheckpointStore;
use crate::domain::state::CycleState;
use crate::error::{ConclaveError, Result};

use super::condition::Condition;
use super::graph::{ExecutablePlan, WorkflowNode, END_NODE};
use super::plugin::{NodeFailureKind, PluginContext};
use super::registry::PluginRegistry;

pub struct PipelineRuntime {
    registry: Arc<PluginRegistry>,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl PipelineRuntime {
    pub fn new(registry: Arc<PluginRegistry>, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            registry,
            checkpoints,
        }
    }

    /// Execute the plan, returning the final state.
    pub async fn execute(
        &self,
        plan: &ExecutablePlan,
        mut state: CycleState,
        ctx: &PluginContext,
    ) -> Result<CycleState> {
        let thread_id = state.thread_id();
        let cycle_id = state.cycle_id;
        let mut activated: HashSet<String> = plan.entry_nodes.iter().cloned().collect();

        info!(
            workflow = %plan.workflow_name,
            version = plan.version,
            cycle_id,
            nodes = plan.order.len(),
            "pipeline started"
        );

        for node in &plan.order {
            if ctx.is_cancelled() {
                info!(cycle_id, node = %node.name, "cycle cancelled before node");
                return Err(ConclaveError::Cancelled);
            }
            if !activated.contains(&node.name) {
                debug!(node = %node.name, "branch not taken, skipping");
                continue;
            }

            match self.run_node(node, state.clone(), ctx).await {
                Ok(new_state) => {
                    state = new_state;
                    self.checkpoints
                        .put(&thread_id, cycle_id, &node.name, &state)
                        .await?;
                    self.activate_edges(plan, node, &state, &mut activated, false)?;
                }
                Err(e) if e.kind == NodeFailureKind::Recoverable => {
                    warn!(node = %node.name, "recoverable node failure: {}", e.message);
                    state.record_error(&node.name, &e.message);
                    // The checkpoint retains the failed state for diagnosis
                    self.checkpoints
                        .put(&thread_id, cycle_id, &node.name, &state)
                        .await?;
                    self.activate_edges(plan, node, &state, &mut activated, true)?;
                }
                Err(e) => {
                    if ctx.is_cancelled() {
                        info!(cycle_id, node = %node.name, "cycle cancelled in node");
                        return Err(ConclaveError::Cancelled);
                    }
                    state.record_error(&node.name, &e.message);
                    return Err(ConclaveError::CycleAborted(format!(
                        "node '{}' failed fatally: {}",
                        node.name, e.message
                    )));
                }
            }
        }

        info!(cycle_id, errors = state.errors.len(), "pipeline completed");
        Ok(state)
    }

    async fn run_node(
        &self,
        node: &WorkflowNode,
        state: CycleState,
        ctx: &PluginContext,
    ) -> std::result::Result<CycleState, super::plugin::NodeError> {
        use super::plugin::NodeError;

        let plugin = self
            .registry
            .create(&node.plugin_name, node.config.clone())
            .map_err(|e| NodeError::fatal(e.to_string()))?;

        debug!(node = %node.name, plugin = %node.plugin_name, "node started");

        let timeout = node
            .config
            .get("timeout_secs")
            .and_then(|v| v.as_u64())
            .map(Duration::from_secs);

        let mut shutdown = ctx.shutdown.clone();
        let run = plugin.run(state, ctx);

        let result = tokio::select! {
            res = async {
                match timeout {
                    Some(t) => tokio::time::timeout(t, run)
                        .await
                        .unwrap_or_else(|_| Err(NodeError::recoverable(format!(
                            "node timed out after {}s",
                            t.as_secs()
                        )))),
                    None => run.await,
                }
            } => res,
            _ = shutdown.wait_for(|stopped| *stopped) => {
                return Err(NodeError::fatal("cancelled"));
            }
        };

        result
    }

    /// Fire outbound edges, activating target nodes.
    ///
    /// Conditions are evaluated against the JSON projection of the state in
    /// target execution order. After a recoverable failure only the default
    /// (unconditional) edges fire. A node whose outbound edges all stay cold
    /// simply terminates its branch.
    fn activate_edges(
        &self,
        plan: &ExecutablePlan,
        node: &WorkflowNode,
        state: &CycleState,
        activated: &mut HashSet<String>,
        default_only: bool,
    ) -> Result<()> {
        let outbound = plan.outbound(&node.name);
        if outbound.is_empty() {
            return Ok(());
        }

        // Lazily project the state only when a condition needs it
        let mut projection: Option<serde_json::Value> = None;

        for edge in outbound {
            if edge.to_node == END_NODE {
                continue;
            }
            let fire = match &edge.condition {
                None => true,
                Some(_) if default_only => false,
                Some(expr) => {
                    let condition = Condition::parse(expr)?;
                    if projection.is_none() {
                        projection = Some(serde_json::to_value(state)?);
                    }
                    condition.eval(projection.as_ref().expect("projected above"))
                }
            };
            if fire {
                debug!(from = %node.name, to = %edge.to_node, "edge fired");
                activated.insert(edge.to_node.clone());
            } else {
                debug!(from = %node.name, to = %edge.to_node, "edge stayed cold");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::checkpoint::MemoryCheckpointStore;
    use crate::pipeline::graph::{WorkflowEdge, WorkflowSpec};
    use crate::pipeline::plugin::{NodeError, NodeMetadata, NodePlugin};
    use async_trait::async_trait;

    /// Test plugin driven by its node config: records its name into the
    /// state symbols, optionally failing.
    struct MarkerNode {
        metadata: NodeMetadata,
        config: serde_json::Value,
    }

    fn marker_constructor(
        config: serde_json::Value,
    ) -> crate::error::Result<Arc<dyn NodePlugin>> {
        Ok(Arc::new(MarkerNode {
            metadata: NodeMetadata {
                name: "marker".into(),
                display_name: "Marker".into(),
                category: "analysis".into(),
                insert_after: None,
                suggested_order: 1,
                requires_llm: false,
                requires_trader: false,
            },
            config,
        }))
    }

    #[async_trait]
    impl NodePlugin for MarkerNode {
        fn metadata(&self) -> &NodeMetadata {
            &self.metadata
        }

        async fn run(
            &self,
            mut state: CycleState,
            _ctx: &PluginContext,
        ) -> std::result::Result<CycleState, NodeError> {
            if let Some(fail) = self.config.get("fail").and_then(|v| v.as_str()) {
                return match fail {
                    "fatal" => Err(NodeError::fatal("boom")),
                    _ => Err(NodeError::recoverable("soft boom")),
                };
            }
            let mark = self
                .config
                .get("mark")
                .and_then(|v| v.as_str())
                .unwrap_or("?")
                .to_string();
            state.symbols.push(mark);
            Ok(state)
        }
    }

    mod fixtures {
        use super::*;
        use crate::adapters::MemoryStore;
        use crate::config::DebateConfig;
        use crate::domain::bot::{BotConfig, ExchangeConfig, QuantWeights, RiskLimits, TradingMode};
        use crate::domain::market::AccountBalance;
        use crate::exchange::adapter::{ExchangeAdapter, StreamChannel};
        use crate::exchange::{RateLimitedClient, RateLimiter};
        use crate::llm::LlmFactory;
        use crate::market::{MarketCache, MarketDataService, StreamManager};
        use chrono::Utc;
        use futures_util::stream::BoxStream;
        use rust_decimal::Decimal;
        use rust_decimal_macros::dec;
        use std::collections::HashMap;

        pub struct NullAdapter;

        #[async_trait]
        impl ExchangeAdapter for NullAdapter {
            fn kind(&self) -> &str {
                "null"
            }
            fn is_testnet(&self) -> bool {
                true
            }
            async fn load_markets(
                &self,
            ) -> crate::error::Result<crate::domain::market::MarketCatalogue> {
                Ok(Default::default())
            }
            async fn fetch_ohlcv(
                &self,
                _: &str,
                _: &str,
                _: u32,
            ) -> crate::error::Result<Vec<crate::domain::market::Candle>> {
                Ok(Vec::new())
            }
            async fn fetch_ticker(
                &self,
                symbol: &str,
            ) -> crate::error::Result<crate::domain::market::Ticker> {
                Ok(crate::domain::market::Ticker {
                    symbol: symbol.into(),
                    last: dec!(1),
                    bid: None,
                    ask: None,
                    timestamp: Utc::now(),
                })
            }
            async fn fetch_orderbook(
                &self,
                _: &str,
                _: u32,
            ) -> crate::error::Result<crate::domain::market::OrderbookSnapshot> {
                unimplemented!()
            }
            async fn fetch_open_interest(&self, _: &str) -> crate::error::Result<Decimal> {
                Ok(dec!(0))
            }
            async fn fetch_funding_rate(&self, _: &str) -> crate::error::Result<Decimal> {
                Ok(dec!(0))
            }
            async fn fetch_balance(
                &self,
            ) -> crate::error::Result<crate::domain::market::AccountBalance> {
                Ok(AccountBalance::zero("USDT"))
            }
            async fn fetch_positions(
                &self,
            ) -> crate::error::Result<Vec<crate::domain::order::Position>> {
                Ok(Vec::new())
            }
            async fn create_order(
                &self,
                _: &crate::domain::order::OrderRequest,
            ) -> crate::error::Result<crate::domain::order::Order> {
                unimplemented!()
            }
            async fn cancel_order(&self, _: &str, _: &str) -> crate::error::Result<()> {
                Ok(())
            }
            async fn watch_ticker(
                &self,
                _: &str,
            ) -> crate::error::Result<BoxStream<'static, crate::error::Result<crate::domain::market::Ticker>>>
            {
                Ok(futures_util::stream::pending().boxed())
            }
            async fn watch_trades(
                &self,
                _: &str,
            ) -> crate::error::Result<
                BoxStream<'static, crate::error::Result<crate::domain::market::PublicTrade>>,
            > {
                Ok(futures_util::stream::pending().boxed())
            }
            async fn unwatch(&self, _: &str, _: StreamChannel) -> crate::error::Result<()> {
                Ok(())
            }
        }

        use futures_util::StreamExt;

        pub fn bot_config() -> BotConfig {
            BotConfig {
                id: 1,
                name: "bot".into(),
                display_name: "Bot".into(),
                exchange_id: 1,
                workflow_id: 1,
                llm_id: None,
                trading_mode: TradingMode::Paper,
                cycle_interval_secs: 60,
                max_concurrent_symbols: 3,
                timeframes: vec!["3m".into()],
                ohlcv_limits: HashMap::new(),
                indicator_configs: serde_json::Value::Null,
                quant_weights: QuantWeights::default(),
                quant_threshold: 50.0,
                risk_limits: RiskLimits::default(),
                tracing_project: None,
                is_active: true,
            }
        }

        pub fn context() -> (PluginContext, tokio::sync::watch::Sender<bool>) {
            let adapter: Arc<dyn ExchangeAdapter> = Arc::new(NullAdapter);
            let limiter = Arc::new(RateLimiter::with_quota("null", 6000));
            let client = Arc::new(RateLimitedClient::new(adapter.clone(), limiter, 10));
            let cache = Arc::new(MarketCache::with_defaults());
            let market = Arc::new(MarketDataService::new(client.clone(), cache.clone()));
            let streams = Arc::new(StreamManager::new(adapter, cache.clone()));
            let (tx, rx) = tokio::sync::watch::channel(false);

            let ctx = PluginContext {
                exchange: client,
                market,
                cache,
                streams,
                llm: Arc::new(LlmFactory::new(Vec::new())),
                store: Arc::new(MemoryStore::new()),
                bot: Arc::new(bot_config()),
                exchange_config: Arc::new(ExchangeConfig {
                    id: 1,
                    name: "null".into(),
                    kind: "null".into(),
                    testnet: true,
                    api_key: None,
                    secret_key: None,
                    slippage: None,
                    commission: None,
                }),
                prompt_cache: Arc::new(crate::llm::PromptCache::new()),
                debate_defaults: DebateConfig::default(),
                prompts_dir: None,
                shutdown: rx,
            };
            (ctx, tx)
        }

        pub fn state() -> CycleState {
            CycleState::new(
                1,
                bot_config(),
                AccountBalance::zero("USDT"),
                Vec::new(),
            )
        }
    }

    fn registry() -> Arc<PluginRegistry> {
        let mut registry = PluginRegistry::new();
        registry.register(
            NodeMetadata {
                name: "marker".into(),
                display_name: "Marker".into(),
                category: "analysis".into(),
                insert_after: None,
                suggested_order: 1,
                requires_llm: false,
                requires_trader: false,
            },
            marker_constructor,
        );
        Arc::new(registry)
    }

    fn node(name: &str, order: i32, config: serde_json::Value) -> WorkflowNode {
        WorkflowNode {
            id: order as i64,
            name: name.into(),
            plugin_name: "marker".into(),
            execution_order: order,
            enabled: true,
            config,
        }
    }

    fn edge(from: &str, to: &str, condition: Option<&str>) -> WorkflowEdge {
        WorkflowEdge {
            from_node: from.into(),
            to_node: to.into(),
            condition: condition.map(String::from),
        }
    }

    fn plan(nodes: Vec<WorkflowNode>, edges: Vec<WorkflowEdge>) -> ExecutablePlan {
        WorkflowSpec {
            id: 1,
            name: "test".into(),
            version: 1,
            user_edited: false,
            nodes,
            edges,
        }
        .snapshot()
        .unwrap()
    }

    #[tokio::test]
    async fn test_linear_execution_checkpoints_each_node() {
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let runtime = PipelineRuntime::new(registry(), checkpoints.clone());
        let (ctx, _tx) = fixtures::context();

        let plan = plan(
            vec![
                node("a", 1, serde_json::json!({"mark": "a"})),
                node("b", 2, serde_json::json!({"mark": "b"})),
            ],
            vec![edge("a", "b", None)],
        );

        let final_state = runtime
            .execute(&plan, fixtures::state(), &ctx)
            .await
            .unwrap();
        assert_eq!(final_state.symbols, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(checkpoints.len(), 2);

        // Rewinding to after 'a' yields the state 'b' saw
        let after_a = checkpoints.get("bot_1", 1, "a").await.unwrap().unwrap();
        assert_eq!(after_a.symbols, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_conditional_edge_routing() {
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let runtime = PipelineRuntime::new(registry(), checkpoints);
        let (ctx, _tx) = fixtures::context();

        // a marks "a"; the edge to b requires a symbol count > 5, edge to c
        // fires on the actual count
        let plan = plan(
            vec![
                node("a", 1, serde_json::json!({"mark": "a"})),
                node("b", 2, serde_json::json!({"mark": "b"})),
                node("c", 3, serde_json::json!({"mark": "c"})),
            ],
            vec![
                edge("a", "b", Some("cycle_id > 5")),
                edge("a", "c", Some("cycle_id == 1")),
            ],
        );

        let final_state = runtime
            .execute(&plan, fixtures::state(), &ctx)
            .await
            .unwrap();
        assert_eq!(final_state.symbols, vec!["a".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn test_recoverable_failure_continues_default_edge() {
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let runtime = PipelineRuntime::new(registry(), checkpoints.clone());
        let (ctx, _tx) = fixtures::context();

        let plan = plan(
            vec![
                node("a", 1, serde_json::json!({"fail": "recoverable"})),
                node("b", 2, serde_json::json!({"mark": "b"})),
            ],
            vec![edge("a", "b", None)],
        );

        let final_state = runtime
            .execute(&plan, fixtures::state(), &ctx)
            .await
            .unwrap();
        assert_eq!(final_state.symbols, vec!["b".to_string()]);
        assert_eq!(final_state.errors.len(), 1);
        assert_eq!(final_state.errors[0].node, "a");
        // The failed state was checkpointed for diagnosis
        assert!(checkpoints.get("bot_1", 1, "a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_fatal_failure_aborts_cycle() {
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let runtime = PipelineRuntime::new(registry(), checkpoints.clone());
        let (ctx, _tx) = fixtures::context();

        let plan = plan(
            vec![
                node("a", 1, serde_json::json!({"fail": "fatal"})),
                node("b", 2, serde_json::json!({"mark": "b"})),
            ],
            vec![edge("a", "b", None)],
        );

        let err = runtime
            .execute(&plan, fixtures::state(), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ConclaveError::CycleAborted(_)));
        // No checkpoint was written for the aborted node
        assert!(checkpoints.get("bot_1", 1, "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancellation_stops_before_next_node() {
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let runtime = PipelineRuntime::new(registry(), checkpoints.clone());
        let (ctx, tx) = fixtures::context();

        tx.send(true).unwrap();
        let plan = plan(vec![node("a", 1, serde_json::json!({"mark": "a"}))], vec![]);

        let err = runtime
            .execute(&plan, fixtures::state(), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ConclaveError::Cancelled));
        assert!(checkpoints.is_empty());
    }
}
