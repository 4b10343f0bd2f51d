//! Bot, risk-limit and exchange configuration rows.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// Trading mode for a bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingMode {
    Paper,
    Live,
    Backtest,
}

impl TradingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradingMode::Paper => "paper",
            TradingMode::Live => "live",
            TradingMode::Backtest => "backtest",
        }
    }

    /// Simulated fills apply in every mode except live.
    pub fn is_simulated(&self) -> bool {
        !matches!(self, TradingMode::Live)
    }
}

impl FromStr for TradingMode {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "paper" => Ok(TradingMode::Paper),
            "live" => Ok(TradingMode::Live),
            "backtest" => Ok(TradingMode::Backtest),
            _ => Err("invalid trading mode; expected paper|live|backtest"),
        }
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Weights for the quantitative signal score. Must sum to 1.0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantWeights {
    pub trend: f64,
    pub momentum: f64,
    pub volume: f64,
    pub sentiment: f64,
}

impl Default for QuantWeights {
    fn default() -> Self {
        Self {
            trend: 0.4,
            momentum: 0.3,
            volume: 0.2,
            sentiment: 0.1,
        }
    }
}

impl QuantWeights {
    pub fn sum(&self) -> f64 {
        self.trend + self.momentum + self.volume + self.sentiment
    }

    pub fn is_normalized(&self) -> bool {
        (self.sum() - 1.0).abs() < 1e-6
    }
}

/// Closed set of risk limits enforced before every order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLimits {
    // Exposure
    pub max_total_allocation_pct: f64,
    pub max_single_allocation_pct: f64,

    // Leverage
    pub max_leverage: u32,
    pub default_leverage: u32,
    /// When false, a decision without leverage is rejected rather than
    /// defaulted to `default_leverage`.
    pub default_leverage_enabled: bool,

    // Sizing
    pub min_position_size_usd: Decimal,
    pub max_position_size_usd: Decimal,
    pub min_risk_reward_ratio: f64,

    // Breakers
    pub max_consecutive_losses: u32,
    pub max_daily_loss_pct: f64,
    pub max_drawdown_pct: f64,

    // Funding
    pub max_funding_rate_pct: f64,
    pub funding_rate_check_enabled: bool,

    // Trailing stop
    pub trailing_stop_enabled: bool,
    pub trailing_stop_trigger_pct: f64,
    pub trailing_stop_distance_pct: f64,
    pub trailing_stop_lock_profit_pct: f64,

    // Policy switches
    pub hard_stop_enabled: bool,
    pub pause_on_consecutive_loss: bool,
    pub pause_on_max_drawdown: bool,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_total_allocation_pct: 80.0,
            max_single_allocation_pct: 30.0,
            max_leverage: 10,
            default_leverage: 3,
            default_leverage_enabled: false,
            min_position_size_usd: dec!(10),
            max_position_size_usd: dec!(10000),
            min_risk_reward_ratio: 2.0,
            max_consecutive_losses: 5,
            max_daily_loss_pct: 10.0,
            max_drawdown_pct: 20.0,
            max_funding_rate_pct: 0.1,
            funding_rate_check_enabled: true,
            trailing_stop_enabled: false,
            trailing_stop_trigger_pct: 5.0,
            trailing_stop_distance_pct: 2.0,
            trailing_stop_lock_profit_pct: 1.0,
            hard_stop_enabled: true,
            pause_on_consecutive_loss: true,
            pause_on_max_drawdown: true,
        }
    }
}

impl RiskLimits {
    /// Validate config invariants. Returns list of problems (empty = valid).
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.max_total_allocation_pct <= 0.0 || self.max_total_allocation_pct > 100.0 {
            errors.push(format!(
                "max_total_allocation_pct must be in (0, 100], got {}",
                self.max_total_allocation_pct
            ));
        }
        if self.max_single_allocation_pct <= 0.0
            || self.max_single_allocation_pct > self.max_total_allocation_pct
        {
            errors.push(format!(
                "max_single_allocation_pct must be in (0, {}], got {}",
                self.max_total_allocation_pct, self.max_single_allocation_pct
            ));
        }
        if self.max_leverage == 0 {
            errors.push("max_leverage must be > 0".to_string());
        }
        if self.default_leverage == 0 || self.default_leverage > self.max_leverage {
            errors.push(format!(
                "default_leverage must be in [1, {}], got {}",
                self.max_leverage, self.default_leverage
            ));
        }
        if self.min_position_size_usd <= Decimal::ZERO {
            errors.push("min_position_size_usd must be > 0".to_string());
        }
        if self.max_position_size_usd < self.min_position_size_usd {
            errors.push("max_position_size_usd must be >= min_position_size_usd".to_string());
        }
        if self.trailing_stop_enabled {
            if self.trailing_stop_trigger_pct <= 0.0 {
                errors.push("trailing_stop_trigger_pct must be > 0".to_string());
            }
            if self.trailing_stop_distance_pct <= 0.0 {
                errors.push("trailing_stop_distance_pct must be > 0".to_string());
            }
        }
        errors
    }
}

/// Durable per-bot configuration. Mutable from the control plane; re-read at
/// least once per cycle, changes take effect on the next cycle boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    pub id: i64,
    pub name: String,
    pub display_name: String,

    // Wiring
    pub exchange_id: i64,
    pub workflow_id: i64,
    pub llm_id: Option<i64>,

    // Execution parameters
    pub trading_mode: TradingMode,
    pub cycle_interval_secs: u64,
    pub max_concurrent_symbols: usize,
    pub timeframes: Vec<String>,
    pub ohlcv_limits: HashMap<String, u32>,
    #[serde(default)]
    pub indicator_configs: serde_json::Value,

    // Quantitative filter
    pub quant_weights: QuantWeights,
    pub quant_threshold: f64,

    // Risk
    pub risk_limits: RiskLimits,

    // Tracing keys (optional, opaque to the core)
    #[serde(default)]
    pub tracing_project: Option<String>,

    pub is_active: bool,
}

impl BotConfig {
    pub fn thread_id(&self) -> String {
        format!("bot_{}", self.id)
    }

    /// OHLCV candle count for a timeframe, with a sane floor for indicators.
    pub fn ohlcv_limit(&self, timeframe: &str) -> u32 {
        self.ohlcv_limits.get(timeframe).copied().unwrap_or(100)
    }

    /// Validate config invariants. Returns list of problems (empty = valid).
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.name.trim().is_empty() {
            errors.push("name must not be empty".to_string());
        }
        if self.cycle_interval_secs == 0 {
            errors.push("cycle_interval_secs must be > 0".to_string());
        }
        if self.max_concurrent_symbols == 0 {
            errors.push("max_concurrent_symbols must be > 0".to_string());
        }
        if self.timeframes.is_empty() {
            errors.push("at least one timeframe is required".to_string());
        }
        if !self.quant_weights.is_normalized() {
            errors.push(format!(
                "quant_weights must sum to 1.0, got {:.4}",
                self.quant_weights.sum()
            ));
        }
        if !(0.0..=100.0).contains(&self.quant_threshold) {
            errors.push(format!(
                "quant_threshold must be in [0, 100], got {}",
                self.quant_threshold
            ));
        }
        errors.extend(self.risk_limits.validate());
        errors
    }
}

/// Exchange connection row. Credentials stay opaque to the core; the protocol
/// adapter consumes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub id: i64,
    pub name: String,
    /// Venue kind: "binance", "bybit", "hyperliquid", ...
    pub kind: String,
    pub testnet: bool,
    pub api_key: Option<String>,
    pub secret_key: Option<String>,
    /// Slippage fraction applied by simulated fills (e.g. 0.001 = 0.1%)
    #[serde(default)]
    pub slippage: Option<Decimal>,
    /// Taker commission fraction; 0.0005 (0.05%) when absent
    #[serde(default)]
    pub commission: Option<Decimal>,
}

impl ExchangeConfig {
    pub fn commission_rate(&self) -> Decimal {
        self.commission.unwrap_or(dec!(0.0005))
    }

    pub fn slippage_rate(&self) -> Decimal {
        self.slippage.unwrap_or(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bot() -> BotConfig {
        BotConfig {
            id: 1,
            name: "test_bot".into(),
            display_name: "Test Bot".into(),
            exchange_id: 1,
            workflow_id: 1,
            llm_id: None,
            trading_mode: TradingMode::Paper,
            cycle_interval_secs: 300,
            max_concurrent_symbols: 5,
            timeframes: vec!["3m".into(), "4h".into()],
            ohlcv_limits: HashMap::from([("3m".into(), 100), ("4h".into(), 50)]),
            indicator_configs: serde_json::Value::Null,
            quant_weights: QuantWeights::default(),
            quant_threshold: 50.0,
            risk_limits: RiskLimits::default(),
            tracing_project: None,
            is_active: true,
        }
    }

    #[test]
    fn test_trading_mode_roundtrip() {
        for mode in [TradingMode::Paper, TradingMode::Live, TradingMode::Backtest] {
            assert_eq!(mode.as_str().parse::<TradingMode>().unwrap(), mode);
        }
        assert!("margin".parse::<TradingMode>().is_err());
    }

    #[test]
    fn test_bot_validation() {
        let bot = sample_bot();
        assert!(bot.validate().is_empty());

        let mut bad = sample_bot();
        bad.quant_weights.trend = 0.9;
        assert!(bad
            .validate()
            .iter()
            .any(|e| e.contains("quant_weights")));
    }

    #[test]
    fn test_risk_limit_validation() {
        let mut limits = RiskLimits::default();
        assert!(limits.validate().is_empty());

        limits.max_single_allocation_pct = 90.0; // above total of 80
        assert!(!limits.validate().is_empty());
    }

    #[test]
    fn test_ohlcv_limit_fallback() {
        let bot = sample_bot();
        assert_eq!(bot.ohlcv_limit("3m"), 100);
        assert_eq!(bot.ohlcv_limit("1d"), 100);
        assert_eq!(bot.ohlcv_limit("4h"), 50);
    }
}
