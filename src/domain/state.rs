//! Cycle state threaded through pipeline nodes, plus the published BotStatus.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::bot::BotConfig;
use super::decision::{DebateOutcome, PortfolioDecision};
use super::market::{AccountBalance, IndicatorSet, QuantScore};
use super::order::{Position, PositionSide};
use super::AnalystOutput;

/// Outcome of executing one decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Skipped,
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_paid: Option<Decimal>,
}

impl ExecutionOutcome {
    pub fn skipped(message: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Skipped,
            message: message.into(),
            order_id: None,
            executed_price: None,
            executed_amount: None,
            fee_paid: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            message: message.into(),
            order_id: None,
            executed_price: None,
            executed_amount: None,
            fee_paid: None,
        }
    }
}

/// Per-symbol record for one cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indicators: Option<IndicatorSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quant: Option<QuantScore>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyst: Option<AnalystOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<PortfolioDecision>,
    /// Set by the risk monitor; the executor only releases approved orders
    #[serde(default)]
    pub risk_approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionOutcome>,
    /// Reason a node dropped the symbol from further processing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
}

impl RunRecord {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            symbol: symbol.into(),
            indicators: None,
            quant: None,
            analyst: None,
            decision: None,
            risk_approved: false,
            execution: None,
            skipped: None,
        }
    }
}

/// An error recorded into the cycle without aborting it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleError {
    pub node: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Rolling performance metrics injected into prompts and risk checks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceWindow {
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub win_rate: f64,
    pub avg_return_pct: f64,
    pub total_return_usd: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown_pct: f64,
    pub profit_factor: f64,
    pub consecutive_losses: u32,
}

impl PerformanceWindow {
    /// Render for prompt injection.
    pub fn to_prompt_text(&self) -> String {
        if self.total_trades == 0 {
            return "No historical trades yet.\n".to_string();
        }
        let mut text = String::from("Historical performance:\n");
        text.push_str(&format!("  Total trades: {}\n", self.total_trades));
        text.push_str(&format!("  Win rate: {:.1}%\n", self.win_rate));
        text.push_str(&format!("  Sharpe ratio: {:.2}\n", self.sharpe_ratio));
        text.push_str(&format!(
            "  Avg return per trade: {:.2}%\n",
            self.avg_return_pct
        ));
        text.push_str(&format!("  Total return: ${:.2}\n", self.total_return_usd));
        text.push_str(&format!("  Max drawdown: {:.2}%\n", self.max_drawdown_pct));
        if self.consecutive_losses > 0 {
            text.push_str(&format!(
                "  Consecutive losses: {}\n",
                self.consecutive_losses
            ));
        }
        text
    }
}

/// Proposed stop-loss amendment produced by the risk monitor. The executor is
/// responsible for issuing the amend order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailingStopProposal {
    pub symbol: String,
    pub side: PositionSide,
    pub current_pnl_pct: f64,
    pub new_stop_price: Decimal,
    pub locks_profit_pct: f64,
}

/// Mutable record threaded through the pipeline for one cycle.
///
/// `cycle_id` is strictly increasing per bot; once the final checkpoint is
/// written the state is read-only. Symbol maps are BTreeMaps so serialization
/// is deterministic and checkpoint re-reads compare byte-identical.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleState {
    pub cycle_id: i64,
    pub bot_id: i64,
    pub started_at: DateTime<Utc>,
    pub config_snapshot: BotConfig,

    /// Candidate symbols for this cycle, in selection order
    pub symbols: Vec<String>,
    pub runs: BTreeMap<String, RunRecord>,

    pub balance: AccountBalance,
    pub positions: Vec<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance: Option<PerformanceWindow>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debate: Option<DebateOutcome>,
    #[serde(default)]
    pub trailing_stop_proposals: Vec<TrailingStopProposal>,

    #[serde(default)]
    pub errors: Vec<CycleError>,
    /// Breaker trip reason; the scheduler pauses the bot when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_requested: Option<String>,
}

impl CycleState {
    pub fn new(
        cycle_id: i64,
        config: BotConfig,
        balance: AccountBalance,
        positions: Vec<Position>,
    ) -> Self {
        Self {
            cycle_id,
            bot_id: config.id,
            started_at: Utc::now(),
            config_snapshot: config,
            symbols: Vec::new(),
            runs: BTreeMap::new(),
            balance,
            positions,
            performance: None,
            debate: None,
            trailing_stop_proposals: Vec::new(),
            errors: Vec::new(),
            pause_requested: None,
        }
    }

    pub fn thread_id(&self) -> String {
        format!("bot_{}", self.bot_id)
    }

    pub fn record_error(&mut self, node: impl Into<String>, message: impl Into<String>) {
        self.errors.push(CycleError {
            node: node.into(),
            message: message.into(),
            at: Utc::now(),
        });
    }

    /// Insert a run record for every symbol not yet tracked.
    pub fn ensure_runs(&mut self) {
        for symbol in &self.symbols {
            self.runs
                .entry(symbol.clone())
                .or_insert_with(|| RunRecord::new(symbol.clone()));
        }
    }

    /// Drop a symbol from further processing while keeping its record.
    pub fn skip_symbol(&mut self, symbol: &str, reason: impl Into<String>) {
        self.symbols.retain(|s| s != symbol);
        if let Some(run) = self.runs.get_mut(symbol) {
            run.skipped = Some(reason.into());
        }
    }

    pub fn position_for(&self, symbol: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.symbol == symbol)
    }

    /// Symbols the stream layer must keep subscribed: candidates plus
    /// anything we hold a position in.
    pub fn streaming_symbols(&self) -> Vec<String> {
        let mut symbols = self.symbols.clone();
        for pos in &self.positions {
            if !symbols.contains(&pos.symbol) {
                symbols.push(pos.symbol.clone());
            }
        }
        symbols
    }

    /// Short human summary of the final decision for status publishing.
    pub fn decision_summary(&self) -> Option<String> {
        if let Some(debate) = &self.debate {
            return Some(debate.final_decision.summary());
        }
        let parts: Vec<String> = self
            .runs
            .values()
            .filter_map(|r| {
                r.decision
                    .as_ref()
                    .map(|d| format!("{}:{}", d.symbol, d.action))
            })
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }
}

/// Lifecycle state published for UI polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotState {
    Running,
    Idle,
    Error,
    Stopped,
    Unknown,
}

impl BotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotState::Running => "running",
            BotState::Idle => "idle",
            BotState::Error => "error",
            BotState::Stopped => "stopped",
            BotState::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for BotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Eventually-consistent snapshot published by the worker after each cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotStatus {
    pub bot_id: i64,
    pub is_running: bool,
    pub state: BotState,
    pub current_cycle: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub open_positions: usize,
    pub symbols_trading: Vec<String>,
    pub balance: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_decision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debate: Option<DebateOutcome>,
    pub updated_at: DateTime<Utc>,
}

impl BotStatus {
    pub fn offline(bot_id: i64) -> Self {
        Self {
            bot_id,
            is_running: false,
            state: BotState::Unknown,
            current_cycle: 0,
            last_cycle_at: None,
            open_positions: 0,
            symbols_trading: Vec::new(),
            balance: Decimal::ZERO,
            last_decision: None,
            last_error: None,
            debate: None,
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::bot::{QuantWeights, RiskLimits, TradingMode};
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn sample_config() -> BotConfig {
        BotConfig {
            id: 7,
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

    fn sample_state() -> CycleState {
        CycleState::new(
            1,
            sample_config(),
            AccountBalance {
                currency: "USDT".into(),
                free: dec!(1000),
                used: dec!(0),
                total: dec!(1000),
                timestamp: Utc::now(),
            },
            Vec::new(),
        )
    }

    #[test]
    fn test_skip_symbol_keeps_record() {
        let mut state = sample_state();
        state.symbols = vec!["BTC/USDT".into(), "ETH/USDT".into()];
        state.ensure_runs();

        state.skip_symbol("BTC/USDT", "score below threshold");
        assert_eq!(state.symbols, vec!["ETH/USDT".to_string()]);
        assert_eq!(
            state.runs["BTC/USDT"].skipped.as_deref(),
            Some("score below threshold")
        );
    }

    #[test]
    fn test_streaming_symbols_includes_positions() {
        let mut state = sample_state();
        state.symbols = vec!["BTC/USDT".into()];
        state.positions.push(Position {
            symbol: "SOL/USDT".into(),
            side: PositionSide::Long,
            size: dec!(1),
            entry_price: dec!(150),
            mark_price: dec!(151),
            leverage: 2,
            margin_used: dec!(75),
            unrealized_pnl: dec!(1),
            liquidation_price: None,
        });

        let streaming = state.streaming_symbols();
        assert!(streaming.contains(&"BTC/USDT".to_string()));
        assert!(streaming.contains(&"SOL/USDT".to_string()));
    }

    #[test]
    fn test_checkpoint_serialization_is_deterministic() {
        let mut state = sample_state();
        state.symbols = vec!["ETH/USDT".into(), "BTC/USDT".into()];
        state.ensure_runs();

        let first = serde_json::to_vec(&state).unwrap();
        let reparsed: CycleState = serde_json::from_slice(&first).unwrap();
        let second = serde_json::to_vec(&reparsed).unwrap();
        assert_eq!(first, second);
    }
}
