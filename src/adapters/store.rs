//! The durable store seam.
//!
//! One session per bot worker; sessions are not shared across arbitrary
//! concurrent transactions, and workers call `ping` during maintenance to
//! keep connections from ageing out.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::domain::bot::{BotConfig, ExchangeConfig};
use crate::domain::decision::DecisionAction;
use crate::domain::order::TradeRecord;
use crate::error::Result;
use crate::llm::LlmConfig;
use crate::pipeline::graph::WorkflowSpec;

/// Parameters for closing an open trade row.
#[derive(Debug, Clone)]
pub struct TradeClose {
    pub bot_id: i64,
    pub symbol: String,
    pub exit_price: Decimal,
    pub pnl_usd: Decimal,
    pub pnl_percent: f64,
    pub fee_paid: Decimal,
    pub closed_at: DateTime<Utc>,
}

#[async_trait]
pub trait Store: Send + Sync {
    // ==================== Bots ====================

    async fn list_bots(&self) -> Result<Vec<BotConfig>>;

    async fn get_bot(&self, id: i64) -> Result<Option<BotConfig>>;

    async fn create_bot(&self, config: &BotConfig) -> Result<i64>;

    async fn update_bot(&self, config: &BotConfig) -> Result<()>;

    async fn delete_bot(&self, id: i64) -> Result<()>;

    // ==================== Wiring ====================

    async fn get_exchange(&self, id: i64) -> Result<Option<ExchangeConfig>>;

    async fn list_llm_configs(&self) -> Result<Vec<LlmConfig>>;

    // ==================== Workflows ====================

    async fn get_workflow(&self, id: i64) -> Result<Option<WorkflowSpec>>;

    /// Nodes and edges update atomically; bumps the version.
    async fn save_workflow(&self, spec: &WorkflowSpec) -> Result<i64>;

    // ==================== Trade history ====================

    /// Insert a trade row. Returns None when the `(bot_id, cycle_id, symbol,
    /// action)` key already exists, so reprocessing a cycle never duplicates
    /// trades.
    async fn insert_trade(&self, trade: &TradeRecord) -> Result<Option<i64>>;

    /// Close the open row for `(bot_id, symbol)`. Returns false when none is
    /// open.
    async fn close_trade(&self, close: &TradeClose) -> Result<bool>;

    async fn open_trade(&self, bot_id: i64, symbol: &str) -> Result<Option<TradeRecord>>;

    async fn open_trades(&self, bot_id: i64) -> Result<Vec<TradeRecord>>;

    /// Closed trades, newest first.
    async fn recent_closed_trades(&self, bot_id: i64, limit: usize) -> Result<Vec<TradeRecord>>;

    async fn trade_exists(
        &self,
        bot_id: i64,
        cycle_id: i64,
        symbol: &str,
        action: DecisionAction,
    ) -> Result<bool>;

    // ==================== System configs ====================

    async fn get_system_config(&self, key: &str) -> Result<Option<String>>;

    async fn set_system_config(&self, key: &str, value: &str) -> Result<()>;

    async fn system_configs_with_prefix(&self, prefix: &str)
        -> Result<HashMap<String, String>>;

    // ==================== Session upkeep ====================

    /// Cheap liveness probe used by the maintenance pass.
    async fn ping(&self) -> Result<()>;
}
