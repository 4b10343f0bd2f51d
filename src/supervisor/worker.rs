//! The per-bot worker: one-time initialisation followed by the cycle loop.
//!
//! State machine: READY -> LOOP(cycle_n) -> CHECKPOINT -> SLEEP ->
//! LOOP(cycle_n+1), leaving via STOPPING -> STOPPED or ERROR. A stop signal
//! preempts the sleep immediately and aborts the in-flight pipeline at its
//! next suspension point. Every N cycles a maintenance pass refreshes the
//! store session, prunes the cache, reconciles subscriptions and rewrites
//! the status snapshot.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{error, info, warn};

use crate::domain::bot::{BotConfig, TradingMode};
use crate::domain::state::{BotState, BotStatus, CycleState};
use crate::error::{ConclaveError, Result};
use crate::exchange::adapter::StreamChannel;
use crate::exchange::{PaperExchange, RateLimitedClient, RateLimiter};
use crate::llm::LlmFactory;
use crate::market::{MarketCache, MarketDataService, StreamManager};
use crate::pipeline::auto_sync;
use crate::pipeline::graph::linear_workflow;
use crate::pipeline::plugin::PluginContext;
use crate::pipeline::runtime::PipelineRuntime;
use crate::services::config_manager::ConfigManager;
use crate::services::performance;

use super::supervisor::SharedDeps;

/// Default workflow wiring for bots without a stored graph.
const DEFAULT_WORKFLOW: &[&str] = &[
    "coins_pick",
    "market_state",
    "quant_filter",
    "debate_decision",
    "risk_monitor",
    "execution",
];

const STREAM_CHANNELS: &[StreamChannel] = &[StreamChannel::Ticker, StreamChannel::Trades];

/// How the loop ended; drives the final published state.
enum ExitReason {
    Stopped,
    Paused(String),
    Fatal(String),
}

pub struct BotWorker {
    deps: Arc<SharedDeps>,
    bot_id: i64,
    shutdown: watch::Receiver<bool>,
    status: Arc<RwLock<BotStatus>>,
}

impl BotWorker {
    pub fn new(
        deps: Arc<SharedDeps>,
        bot_id: i64,
        shutdown: watch::Receiver<bool>,
        status: Arc<RwLock<BotStatus>>,
    ) -> Self {
        Self {
            deps,
            bot_id,
            shutdown,
            status,
        }
    }

    /// Worker task body. All failure handling is internal: the task itself
    /// never propagates an error, it publishes one.
    pub async fn run(mut self) {
        info!(bot_id = self.bot_id, "worker starting");

        match self.run_inner().await {
            Ok(ExitReason::Stopped) => {
                self.publish_terminal(BotState::Stopped, None).await;
                info!(bot_id = self.bot_id, "worker stopped");
            }
            Ok(ExitReason::Paused(reason)) => {
                self.publish_terminal(BotState::Stopped, Some(reason.clone()))
                    .await;
                warn!(bot_id = self.bot_id, "worker paused by breaker: {}", reason);
            }
            Ok(ExitReason::Fatal(reason)) | Err(ConclaveError::Internal(reason)) => {
                self.publish_terminal(BotState::Error, Some(reason.clone()))
                    .await;
                error!(bot_id = self.bot_id, "worker failed: {}", reason);
            }
            Err(e) => {
                self.publish_terminal(BotState::Error, Some(e.to_string()))
                    .await;
                error!(bot_id = self.bot_id, "worker failed: {}", e);
            }
        }
    }

    async fn run_inner(&mut self) -> Result<ExitReason> {
        let deps = self.deps.clone();
        let config_manager = ConfigManager::new(
            deps.store.clone(),
            self.bot_id,
            Duration::from_secs(deps.config.runtime.bot_config_ttl_secs),
        );
        let bot = config_manager.bot_config().await?;
        if !bot.is_active {
            return Err(ConclaveError::InvalidState(format!(
                "bot {} is not active",
                self.bot_id
            )));
        }

        // ==================== One-time initialisation ====================
        let exchange_config = deps
            .store
            .get_exchange(bot.exchange_id)
            .await?
            .ok_or_else(|| {
                ConclaveError::InvalidConfig(format!("exchange not found: id={}", bot.exchange_id))
            })?;

        let live_adapter = deps.exchange_factory.create(&exchange_config)?;
        let adapter: Arc<dyn crate::exchange::ExchangeAdapter> =
            if bot.trading_mode == TradingMode::Live {
                live_adapter
            } else {
                Arc::new(PaperExchange::new(live_adapter, exchange_config.clone()))
            };

        let limiter = Arc::new(RateLimiter::new(&exchange_config.kind));
        let client = Arc::new(RateLimitedClient::new(
            adapter.clone(),
            limiter,
            deps.config.runtime.max_concurrent_requests,
        ));
        let cache = Arc::new(MarketCache::new(&deps.config.cache));
        let market = Arc::new(MarketDataService::new(client.clone(), cache.clone()));
        let streams = Arc::new(StreamManager::new(adapter.clone(), cache.clone()));
        let llm = Arc::new(LlmFactory::new(deps.store.list_llm_configs().await?));

        // Exchange handshake: market catalogue and balance probe must work
        // before the loop starts
        let catalogue = market.markets().await?;
        let balance = market.balance().await?;
        info!(
            bot_id = self.bot_id,
            markets = catalogue.len(),
            balance = %balance.total,
            "initialisation complete"
        );

        // One sync pass proposes newly-registered plugins to the workflow
        if let Err(e) =
            auto_sync::sync_workflow(deps.store.as_ref(), &deps.registry, bot.workflow_id).await
        {
            warn!("plugin auto-sync failed (non-critical): {}", e);
        }

        let runtime = PipelineRuntime::new(deps.registry.clone(), deps.checkpoints.clone());

        // Cycle counter continuity across restarts
        let thread_id = bot.thread_id();
        let mut cycle_id = deps
            .checkpoints
            .latest_cycle(&thread_id)
            .await?
            .unwrap_or(0);

        self.publish_running(&bot, cycle_id, &balance.total.to_string(), None)
            .await;

        // ==================== Cycle loop ====================
        let maintenance_every = deps.config.runtime.maintenance_every_cycles.max(1);
        loop {
            if *self.shutdown.borrow() {
                streams.shutdown().await;
                return Ok(ExitReason::Stopped);
            }

            // Config changes take effect here, on the cycle boundary
            let bot = config_manager.bot_config().await?;
            if !bot.is_active {
                streams.shutdown().await;
                return Ok(ExitReason::Stopped);
            }
            cycle_id += 1;
            let cycle_started = tokio::time::Instant::now();

            info!(bot_id = self.bot_id, cycle_id, "cycle started");

            let outcome = self
                .run_cycle(
                    &deps, &bot, cycle_id, &client, &market, &cache, &streams, &llm, &runtime,
                )
                .await;

            match outcome {
                Ok(state) => {
                    self.publish_cycle(&bot, &state).await;
                    if let Some(reason) = state.pause_requested {
                        streams.shutdown().await;
                        return Ok(ExitReason::Paused(reason));
                    }
                }
                Err(ConclaveError::Cancelled) => {
                    streams.shutdown().await;
                    return Ok(ExitReason::Stopped);
                }
                Err(e) if e.kind() == crate::error::ErrorKind::Fatal => {
                    streams.shutdown().await;
                    return Ok(ExitReason::Fatal(e.to_string()));
                }
                Err(e) => {
                    // Non-fatal cycle failure: record, publish, keep looping
                    warn!(bot_id = self.bot_id, cycle_id, "cycle failed: {}", e);
                    self.publish_running(&bot, cycle_id, "0", Some(e.to_string()))
                        .await;
                }
            }

            // Maintenance side-effects
            if cycle_id % maintenance_every as i64 == 0 {
                info!(bot_id = self.bot_id, cycle_id, "maintenance pass");
                if let Err(e) = deps.store.ping().await {
                    warn!("store session refresh failed: {}", e);
                }
                let pruned = cache.sweep_expired();
                if pruned > 0 {
                    info!(pruned, "expired cache entries pruned");
                }
                let stats = streams.stats().await;
                info!(
                    active = stats.active,
                    failed = stats.failed_retries,
                    "stream stats at maintenance"
                );
            }

            // Sleep out the remainder of the interval; a stop signal
            // preempts immediately. Overruns skip the sleep entirely.
            let elapsed = cycle_started.elapsed();
            let interval = Duration::from_secs(bot.cycle_interval_secs);
            let sleep_for = interval.saturating_sub(elapsed);
            if sleep_for.is_zero() {
                warn!(
                    bot_id = self.bot_id,
                    cycle_id,
                    elapsed_secs = elapsed.as_secs(),
                    "cycle overran its interval, starting next immediately"
                );
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = async { let _ = self.shutdown.wait_for(|stopped| *stopped).await; } => {
                    streams.shutdown().await;
                    return Ok(ExitReason::Stopped);
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_cycle(
        &self,
        deps: &Arc<SharedDeps>,
        bot: &BotConfig,
        cycle_id: i64,
        client: &Arc<RateLimitedClient>,
        market: &Arc<MarketDataService>,
        cache: &Arc<MarketCache>,
        streams: &Arc<StreamManager>,
        llm: &Arc<LlmFactory>,
        runtime: &PipelineRuntime,
    ) -> Result<CycleState> {
        // Fresh account view for the cycle
        let balance = market.balance().await?;
        let positions = client.fetch_positions().await?;

        let mut state = CycleState::new(cycle_id, bot.clone(), balance, positions);

        // Performance window feeds prompts and breakers
        let closed = deps.store.recent_closed_trades(bot.id, 50).await?;
        state.performance = Some(performance::compute_window(&closed, state.balance.total));

        // Workflow snapshot is frozen here; mid-cycle edits are invisible
        let spec = match deps.store.get_workflow(bot.workflow_id).await? {
            Some(spec) => spec,
            None => {
                warn!(
                    workflow_id = bot.workflow_id,
                    "workflow missing, using default wiring"
                );
                linear_workflow(bot.workflow_id, "default", DEFAULT_WORKFLOW)
            }
        };
        let plan = spec.snapshot()?;

        let exchange_config = deps
            .store
            .get_exchange(bot.exchange_id)
            .await?
            .ok_or_else(|| {
                ConclaveError::InvalidConfig(format!("exchange not found: id={}", bot.exchange_id))
            })?;

        let ctx = PluginContext {
            exchange: client.clone(),
            market: market.clone(),
            cache: cache.clone(),
            streams: streams.clone(),
            llm: llm.clone(),
            store: deps.store.clone(),
            bot: Arc::new(bot.clone()),
            exchange_config: Arc::new(exchange_config),
            prompt_cache: Arc::new(crate::llm::PromptCache::new()),
            debate_defaults: deps.config.debate.clone(),
            prompts_dir: Some(std::path::PathBuf::from(&deps.config.paths.prompts_dir)),
            shutdown: self.shutdown.clone(),
        };

        let state = runtime.execute(&plan, state, &ctx).await?;

        // Reconcile streams against what this cycle decided to watch
        let desired = state.streaming_symbols();
        streams.reconcile(&desired, STREAM_CHANNELS).await;

        Ok(state)
    }

    async fn publish_running(
        &self,
        bot: &BotConfig,
        cycle_id: i64,
        balance: &str,
        last_error: Option<String>,
    ) {
        let status = BotStatus {
            bot_id: bot.id,
            is_running: true,
            state: if last_error.is_some() {
                BotState::Idle
            } else {
                BotState::Running
            },
            current_cycle: cycle_id,
            last_cycle_at: Some(Utc::now()),
            open_positions: 0,
            symbols_trading: Vec::new(),
            balance: balance.parse().unwrap_or_default(),
            last_decision: None,
            last_error,
            debate: None,
            updated_at: Utc::now(),
        };
        self.write_status(status).await;
    }

    async fn publish_cycle(&self, bot: &BotConfig, state: &CycleState) {
        let status = BotStatus {
            bot_id: bot.id,
            is_running: true,
            state: BotState::Running,
            current_cycle: state.cycle_id,
            last_cycle_at: Some(Utc::now()),
            open_positions: state.positions.len(),
            symbols_trading: state.symbols.clone(),
            balance: state.balance.total,
            last_decision: state.decision_summary(),
            last_error: state.errors.last().map(|e| e.message.clone()),
            debate: state.debate.clone(),
            updated_at: Utc::now(),
        };
        self.write_status(status).await;
    }

    async fn publish_terminal(&self, state: BotState, last_error: Option<String>) {
        let mut status = self.status.read().await.clone();
        status.is_running = false;
        status.state = state;
        if last_error.is_some() {
            status.last_error = last_error;
        }
        status.updated_at = Utc::now();
        self.write_status(status).await;
    }

    async fn write_status(&self, status: BotStatus) {
        *self.status.write().await = status.clone();
        if let Err(e) = self.deps.status.write(&status) {
            warn!(bot_id = self.bot_id, "status publish failed: {}", e);
        }
    }
}
