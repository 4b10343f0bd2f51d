//! In-memory store used by tests and store-less development runs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::domain::bot::{BotConfig, ExchangeConfig};
use crate::domain::decision::DecisionAction;
use crate::domain::order::{TradeRecord, TradeStatus};
use crate::error::{ConclaveError, Result};
use crate::llm::LlmConfig;
use crate::pipeline::graph::WorkflowSpec;

use super::store::{Store, TradeClose};

#[derive(Default)]
struct Inner {
    bots: HashMap<i64, BotConfig>,
    exchanges: HashMap<i64, ExchangeConfig>,
    llm_configs: Vec<LlmConfig>,
    workflows: HashMap<i64, WorkflowSpec>,
    trades: Vec<TradeRecord>,
    system_configs: HashMap<String, String>,
    next_bot_id: i64,
    next_trade_id: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_bot_id: 1,
                next_trade_id: 1,
                ..Inner::default()
            }),
        }
    }

    pub fn seed_bot(&self, config: BotConfig) {
        let mut inner = self.inner.lock().unwrap();
        inner.next_bot_id = inner.next_bot_id.max(config.id + 1);
        inner.bots.insert(config.id, config);
    }

    pub fn seed_exchange(&self, config: ExchangeConfig) {
        self.inner
            .lock()
            .unwrap()
            .exchanges
            .insert(config.id, config);
    }

    pub fn seed_llm(&self, config: LlmConfig) {
        self.inner.lock().unwrap().llm_configs.push(config);
    }

    pub fn seed_workflow(&self, spec: WorkflowSpec) {
        self.inner.lock().unwrap().workflows.insert(spec.id, spec);
    }

    pub fn trade_count(&self) -> usize {
        self.inner.lock().unwrap().trades.len()
    }

    pub fn all_trades(&self) -> Vec<TradeRecord> {
        self.inner.lock().unwrap().trades.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_bots(&self) -> Result<Vec<BotConfig>> {
        let inner = self.inner.lock().unwrap();
        let mut bots: Vec<BotConfig> = inner.bots.values().cloned().collect();
        bots.sort_by_key(|b| b.id);
        Ok(bots)
    }

    async fn get_bot(&self, id: i64) -> Result<Option<BotConfig>> {
        Ok(self.inner.lock().unwrap().bots.get(&id).cloned())
    }

    async fn create_bot(&self, config: &BotConfig) -> Result<i64> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_bot_id;
        inner.next_bot_id += 1;
        let mut config = config.clone();
        config.id = id;
        inner.bots.insert(id, config);
        Ok(id)
    }

    async fn update_bot(&self, config: &BotConfig) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.bots.contains_key(&config.id) {
            return Err(ConclaveError::InvalidState(format!(
                "bot not found: id={}",
                config.id
            )));
        }
        inner.bots.insert(config.id, config.clone());
        Ok(())
    }

    async fn delete_bot(&self, id: i64) -> Result<()> {
        self.inner.lock().unwrap().bots.remove(&id);
        Ok(())
    }

    async fn get_exchange(&self, id: i64) -> Result<Option<ExchangeConfig>> {
        Ok(self.inner.lock().unwrap().exchanges.get(&id).cloned())
    }

    async fn list_llm_configs(&self) -> Result<Vec<LlmConfig>> {
        Ok(self.inner.lock().unwrap().llm_configs.clone())
    }

    async fn get_workflow(&self, id: i64) -> Result<Option<WorkflowSpec>> {
        Ok(self.inner.lock().unwrap().workflows.get(&id).cloned())
    }

    async fn save_workflow(&self, spec: &WorkflowSpec) -> Result<i64> {
        let mut inner = self.inner.lock().unwrap();
        let mut spec = spec.clone();
        spec.version += 1;
        let id = spec.id;
        inner.workflows.insert(id, spec);
        Ok(id)
    }

    async fn insert_trade(&self, trade: &TradeRecord) -> Result<Option<i64>> {
        let mut inner = self.inner.lock().unwrap();
        let duplicate = inner.trades.iter().any(|t| {
            t.bot_id == trade.bot_id
                && t.cycle_id == trade.cycle_id
                && t.symbol == trade.symbol
                && t.action == trade.action
        });
        if duplicate {
            return Ok(None);
        }
        // Only one open row per (bot_id, symbol)
        if trade.status == TradeStatus::Open
            && inner.trades.iter().any(|t| {
                t.bot_id == trade.bot_id
                    && t.symbol == trade.symbol
                    && t.status == TradeStatus::Open
            })
        {
            return Err(ConclaveError::InvalidState(format!(
                "{}: open trade already exists",
                trade.symbol
            )));
        }

        let id = inner.next_trade_id;
        inner.next_trade_id += 1;
        let mut trade = trade.clone();
        trade.id = Some(id);
        inner.trades.push(trade);
        Ok(Some(id))
    }

    async fn close_trade(&self, close: &TradeClose) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        match inner.trades.iter_mut().find(|t| {
            t.bot_id == close.bot_id
                && t.symbol == close.symbol
                && t.status == TradeStatus::Open
        }) {
            Some(trade) => {
                trade.status = TradeStatus::Closed;
                trade.exit_price = Some(close.exit_price);
                trade.pnl_usd = Some(close.pnl_usd);
                trade.pnl_percent = Some(close.pnl_percent);
                trade.fee_paid = Some(trade.fee_paid.unwrap_or_default() + close.fee_paid);
                trade.closed_at = Some(close.closed_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn open_trade(&self, bot_id: i64, symbol: &str) -> Result<Option<TradeRecord>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .trades
            .iter()
            .find(|t| t.bot_id == bot_id && t.symbol == symbol && t.status == TradeStatus::Open)
            .cloned())
    }

    async fn open_trades(&self, bot_id: i64) -> Result<Vec<TradeRecord>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .trades
            .iter()
            .filter(|t| t.bot_id == bot_id && t.status == TradeStatus::Open)
            .cloned()
            .collect())
    }

    async fn recent_closed_trades(&self, bot_id: i64, limit: usize) -> Result<Vec<TradeRecord>> {
        let inner = self.inner.lock().unwrap();
        let mut closed: Vec<TradeRecord> = inner
            .trades
            .iter()
            .filter(|t| t.bot_id == bot_id && t.status == TradeStatus::Closed)
            .cloned()
            .collect();
        closed.sort_by(|a, b| b.closed_at.cmp(&a.closed_at));
        closed.truncate(limit);
        Ok(closed)
    }

    async fn trade_exists(
        &self,
        bot_id: i64,
        cycle_id: i64,
        symbol: &str,
        action: DecisionAction,
    ) -> Result<bool> {
        Ok(self.inner.lock().unwrap().trades.iter().any(|t| {
            t.bot_id == bot_id
                && t.cycle_id == cycle_id
                && t.symbol == symbol
                && t.action == action
        }))
    }

    async fn get_system_config(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.lock().unwrap().system_configs.get(key).cloned())
    }

    async fn set_system_config(&self, key: &str, value: &str) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .system_configs
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn system_configs_with_prefix(
        &self,
        prefix: &str,
    ) -> Result<HashMap<String, String>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .system_configs
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
