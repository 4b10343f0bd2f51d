//! The bot supervisor: registry of workers plus the control-plane surface.
//!
//! Every bot runs as an independent task; a fatal error in one bot never
//! touches another. The supervisor captures terminal errors into the
//! published BotStatus and leaves the worker stopped until an operator acts.

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::adapters::checkpoint::CheckpointStore;
use crate::adapters::store::Store;
use crate::config::AppConfig;
use crate::domain::bot::{BotConfig, TradingMode};
use crate::domain::decision::DebateOutcome;
use crate::domain::market::AccountBalance;
use crate::domain::order::Position;
use crate::domain::state::{BotState, BotStatus};
use crate::error::{ConclaveError, Result};
use crate::exchange::adapter::ExchangeFactory;
use crate::pipeline::registry::PluginRegistry;
use crate::services::status_file::{tail_log, StatusPublisher};

use super::worker::BotWorker;

/// Process-wide dependencies shared by every worker. Explicit values wired
/// at startup, never package-level globals.
pub struct SharedDeps {
    pub config: AppConfig,
    pub store: Arc<dyn Store>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub registry: Arc<PluginRegistry>,
    pub exchange_factory: Arc<dyn ExchangeFactory>,
    pub status: StatusPublisher,
}

struct WorkerHandle {
    join: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
    status: Arc<RwLock<BotStatus>>,
}

pub struct BotSupervisor {
    deps: Arc<SharedDeps>,
    workers: RwLock<HashMap<i64, WorkerHandle>>,
}

impl BotSupervisor {
    pub fn new(deps: SharedDeps) -> Self {
        Self {
            deps: Arc::new(deps),
            workers: RwLock::new(HashMap::new()),
        }
    }

    pub fn deps(&self) -> &Arc<SharedDeps> {
        &self.deps
    }

    // ==================== Lifecycle ====================

    /// Start a bot. Rejects when the bot is already running.
    pub async fn start(&self, bot_id: i64) -> Result<()> {
        let mut workers = self.workers.write().await;

        if let Some(handle) = workers.get(&bot_id) {
            if !handle.join.is_finished() {
                return Err(ConclaveError::InvalidState(format!(
                    "bot {} is already running",
                    bot_id
                )));
            }
            workers.remove(&bot_id);
        }

        // Validate existence before allocating anything
        let bot = self
            .deps
            .store
            .get_bot(bot_id)
            .await?
            .ok_or_else(|| ConclaveError::InvalidState(format!("bot not found: id={}", bot_id)))?;
        if !bot.is_active {
            return Err(ConclaveError::InvalidState(format!(
                "bot {} is not active",
                bot_id
            )));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let status = Arc::new(RwLock::new(BotStatus::offline(bot_id)));

        let worker = BotWorker::new(
            self.deps.clone(),
            bot_id,
            shutdown_rx,
            status.clone(),
        );
        let join = tokio::spawn(worker.run());

        workers.insert(
            bot_id,
            WorkerHandle {
                join,
                shutdown: shutdown_tx,
                status,
            },
        );
        info!(bot_id, "bot started");
        Ok(())
    }

    /// Stop a bot gracefully, force-killing after the configured deadline.
    /// Stopping an already-stopped bot is a no-op success.
    pub async fn stop(&self, bot_id: i64) -> Result<()> {
        let handle = {
            let mut workers = self.workers.write().await;
            workers.remove(&bot_id)
        };

        let Some(handle) = handle else {
            // Idempotent: nothing running is a success
            return Ok(());
        };

        info!(bot_id, "stopping bot");
        let _ = handle.shutdown.send(true);

        let deadline = Duration::from_secs(self.deps.config.runtime.stop_deadline_secs);
        let abort = handle.join.abort_handle();
        match tokio::time::timeout(deadline, handle.join).await {
            Ok(Ok(())) => info!(bot_id, "bot drained cleanly"),
            Ok(Err(e)) => warn!(bot_id, "worker task ended abnormally: {}", e),
            Err(_) => {
                warn!(
                    bot_id,
                    deadline_secs = deadline.as_secs(),
                    "drain deadline exceeded, force-killing worker"
                );
                abort.abort();
            }
        }

        if let Err(e) = self.deps.status.mark_stopped(bot_id) {
            warn!(bot_id, "failed to mark status stopped: {}", e);
        }
        Ok(())
    }

    /// Restart: stop then start. Cycle-counter continuity comes from the
    /// checkpoint store.
    pub async fn restart(&self, bot_id: i64) -> Result<()> {
        self.stop(bot_id).await?;
        self.start(bot_id).await
    }

    /// Latest published status for a bot.
    pub async fn status(&self, bot_id: i64) -> BotStatus {
        let workers = self.workers.read().await;
        if let Some(handle) = workers.get(&bot_id) {
            let mut status = handle.status.read().await.clone();
            if handle.join.is_finished() && status.state == BotState::Running {
                // The task died without publishing a terminal state
                status.state = BotState::Error;
                status.is_running = false;
                status
                    .last_error
                    .get_or_insert_with(|| "worker terminated unexpectedly".to_string());
            }
            return status;
        }
        drop(workers);

        // Not in the registry: answer from the published snapshot
        self.deps
            .status
            .read(bot_id)
            .unwrap_or_else(|| BotStatus::offline(bot_id))
    }

    pub async fn is_running(&self, bot_id: i64) -> bool {
        let workers = self.workers.read().await;
        workers
            .get(&bot_id)
            .map(|h| !h.join.is_finished())
            .unwrap_or(false)
    }

    /// Stop every running bot (process shutdown).
    pub async fn stop_all(&self) {
        let ids: Vec<i64> = {
            let workers = self.workers.read().await;
            workers.keys().copied().collect()
        };
        for bot_id in ids {
            if let Err(e) = self.stop(bot_id).await {
                warn!(bot_id, "stop failed during shutdown: {}", e);
            }
        }
    }

    // ==================== Bot CRUD ====================

    pub async fn list_bots(&self) -> Result<Vec<BotConfig>> {
        self.deps.store.list_bots().await
    }

    pub async fn get_bot(&self, bot_id: i64) -> Result<Option<BotConfig>> {
        self.deps.store.get_bot(bot_id).await
    }

    pub async fn create_bot(&self, config: &BotConfig) -> Result<i64> {
        let problems = config.validate();
        if !problems.is_empty() {
            return Err(ConclaveError::InvalidConfig(problems.join("; ")));
        }
        self.deps.store.create_bot(config).await
    }

    pub async fn update_bot(&self, config: &BotConfig) -> Result<()> {
        let problems = config.validate();
        if !problems.is_empty() {
            return Err(ConclaveError::InvalidConfig(problems.join("; ")));
        }
        self.deps.store.update_bot(config).await
    }

    /// Delete a bot. Refuses while the worker is running.
    pub async fn delete_bot(&self, bot_id: i64) -> Result<()> {
        if self.is_running(bot_id).await {
            return Err(ConclaveError::InvalidState(format!(
                "bot {} is running; stop it before deleting",
                bot_id
            )));
        }
        self.deps.store.delete_bot(bot_id).await?;
        let _ = self.deps.status.delete(bot_id);
        Ok(())
    }

    // ==================== Live reads ====================

    /// Positions proxied from the exchange. Simulated modes answer from
    /// trade history; in every case a zero mark price falls back to the last
    /// trade price from the ticker.
    pub async fn get_positions(&self, bot_id: i64) -> Result<Vec<Position>> {
        let (bot, adapter) = self.bot_adapter(bot_id).await?;

        let mut positions = if bot.trading_mode == TradingMode::Live {
            adapter.fetch_positions().await?
        } else {
            // Paper positions live in the worker's fill layer; the durable
            // view is the open trade book
            let open = self.deps.store.open_trades(bot_id).await?;
            open.into_iter()
                .map(|t| Position {
                    symbol: t.symbol,
                    side: t.side,
                    size: t.amount,
                    entry_price: t.entry_price,
                    mark_price: Decimal::ZERO,
                    leverage: t.leverage,
                    margin_used: (t.entry_price * t.amount
                        / Decimal::from(t.leverage.max(1)))
                    .round_dp(8),
                    unrealized_pnl: Decimal::ZERO,
                    liquidation_price: None,
                })
                .collect()
        };

        for position in &mut positions {
            if position.mark_price.is_zero() {
                warn!(
                    symbol = %position.symbol,
                    "mark price is zero, falling back to last trade price"
                );
                match adapter.fetch_ticker(&position.symbol).await {
                    Ok(ticker) => {
                        position.mark_price = ticker.last;
                        position.unrealized_pnl = match position.side {
                            crate::domain::order::PositionSide::Long => {
                                (position.mark_price - position.entry_price) * position.size
                            }
                            crate::domain::order::PositionSide::Short => {
                                (position.entry_price - position.mark_price) * position.size
                            }
                        };
                    }
                    Err(e) => warn!(symbol = %position.symbol, "ticker fallback failed: {}", e),
                }
            }
        }

        Ok(positions)
    }

    /// Balance proxied from the exchange; simulated modes answer from the
    /// published status snapshot.
    pub async fn get_balance(&self, bot_id: i64) -> Result<AccountBalance> {
        let (bot, adapter) = self.bot_adapter(bot_id).await?;
        if bot.trading_mode == TradingMode::Live {
            return adapter.fetch_balance().await;
        }

        let status = self.status(bot_id).await;
        Ok(AccountBalance {
            currency: "USDT".to_string(),
            free: status.balance,
            used: Decimal::ZERO,
            total: status.balance,
            timestamp: status.updated_at,
        })
    }

    /// Most recent cycle's debate artifacts, if any.
    pub async fn get_debate(&self, bot_id: i64) -> Option<DebateOutcome> {
        self.status(bot_id).await.debate
    }

    /// Tail of the bot's log file, falling back to the process log.
    pub fn get_logs(&self, bot_id: i64, lines: usize) -> Result<String> {
        let dir = PathBuf::from(&self.deps.config.logging.dir);
        let bot_log = dir.join(format!("bot_{}.log", bot_id));
        if bot_log.exists() {
            return tail_log(bot_log, lines);
        }
        tail_log(dir.join("conclave.log"), lines)
    }

    async fn bot_adapter(
        &self,
        bot_id: i64,
    ) -> Result<(BotConfig, Arc<dyn crate::exchange::ExchangeAdapter>)> {
        let bot = self
            .deps
            .store
            .get_bot(bot_id)
            .await?
            .ok_or_else(|| ConclaveError::InvalidState(format!("bot not found: id={}", bot_id)))?;
        let exchange = self
            .deps
            .store
            .get_exchange(bot.exchange_id)
            .await?
            .ok_or_else(|| {
                ConclaveError::InvalidConfig(format!("exchange not found: id={}", bot.exchange_id))
            })?;
        let adapter = self.deps.exchange_factory.create(&exchange)?;
        Ok((bot, adapter))
    }
}
