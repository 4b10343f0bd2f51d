//! Decision records produced by the LLM nodes and the debate engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::order::PositionSide;

/// Trend call from the analyst role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendCall {
    Bullish,
    Bearish,
    Neutral,
}

impl TrendCall {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendCall::Bullish => "bullish",
            TrendCall::Bearish => "bearish",
            TrendCall::Neutral => "neutral",
        }
    }
}

/// Support/resistance levels the analyst may emit. Either populated or
/// absent, never an empty shell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyLevels {
    pub support: f64,
    pub resistance: f64,
}

/// Phase A output: one analyst report per candidate symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalystOutput {
    pub symbol: String,
    pub trend: TrendCall,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_levels: Option<KeyLevels>,
    pub summary: String,
}

/// Directional call from a bull or bear trader role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateAction {
    Long,
    Short,
    Wait,
}

/// Phase B output: one suggestion per debating role per round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraderSuggestion {
    pub symbol: String,
    pub action: DebateAction,
    /// Confidence in [0, 100]
    pub confidence: f64,
    pub allocation_pct: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub reasoning: String,
}

/// Final per-symbol action chosen by the risk manager (or batch decision).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    OpenLong,
    OpenShort,
    CloseLong,
    CloseShort,
    Wait,
}

impl DecisionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionAction::OpenLong => "open_long",
            DecisionAction::OpenShort => "open_short",
            DecisionAction::CloseLong => "close_long",
            DecisionAction::CloseShort => "close_short",
            DecisionAction::Wait => "wait",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "open_long" => Some(DecisionAction::OpenLong),
            "open_short" => Some(DecisionAction::OpenShort),
            "close_long" => Some(DecisionAction::CloseLong),
            "close_short" => Some(DecisionAction::CloseShort),
            "wait" => Some(DecisionAction::Wait),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, DecisionAction::OpenLong | DecisionAction::OpenShort)
    }

    pub fn is_close(&self) -> bool {
        matches!(self, DecisionAction::CloseLong | DecisionAction::CloseShort)
    }

    pub fn position_side(&self) -> Option<PositionSide> {
        match self {
            DecisionAction::OpenLong | DecisionAction::CloseLong => Some(PositionSide::Long),
            DecisionAction::OpenShort | DecisionAction::CloseShort => Some(PositionSide::Short),
            DecisionAction::Wait => None,
        }
    }
}

impl std::fmt::Display for DecisionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One per-symbol decision inside a batch.
///
/// Prices arrive from structured LLM output as plain JSON numbers; the
/// executor converts to Decimal at the money boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioDecision {
    pub symbol: String,
    pub action: DecisionAction,
    pub allocation_pct: f64,
    /// Confidence in [0, 100]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leverage: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<f64>,
    pub reasoning: String,
}

impl PortfolioDecision {
    pub fn wait(symbol: impl Into<String>, reasoning: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            action: DecisionAction::Wait,
            allocation_pct: 0.0,
            confidence: 0.0,
            leverage: None,
            stop_loss: None,
            take_profit: None,
            reasoning: reasoning.into(),
        }
    }

    /// Risk/reward ratio relative to an entry price, when both stops exist.
    pub fn risk_reward(&self, entry: f64) -> Option<f64> {
        let (sl, tp) = (self.stop_loss?, self.take_profit?);
        let risk = (entry - sl).abs();
        let reward = (tp - entry).abs();
        if risk <= f64::EPSILON {
            return None;
        }
        Some(reward / risk)
    }

    /// Stops must sit on the correct side of the entry for the direction.
    pub fn stops_coherent(&self, entry: f64) -> bool {
        match (self.action, self.stop_loss, self.take_profit) {
            (DecisionAction::OpenLong, Some(sl), Some(tp)) => sl < entry && entry < tp,
            (DecisionAction::OpenShort, Some(sl), Some(tp)) => tp < entry && entry < sl,
            _ => true,
        }
    }
}

/// Phase C output: the whole-portfolio decision for one cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchDecision {
    pub decisions: Vec<PortfolioDecision>,
    pub total_allocation_pct: f64,
    pub cash_reserve_pct: f64,
    pub strategy_rationale: String,
}

impl BatchDecision {
    /// Default all-wait decision used when the debate flow degrades.
    pub fn all_wait(symbols: &[String], rationale: impl Into<String>) -> Self {
        let rationale = rationale.into();
        Self {
            decisions: symbols
                .iter()
                .map(|s| PortfolioDecision::wait(s, rationale.clone()))
                .collect(),
            total_allocation_pct: 0.0,
            cash_reserve_pct: 100.0,
            strategy_rationale: rationale,
        }
    }

    /// Recompute totals from the member decisions.
    pub fn renormalize(&mut self) {
        self.total_allocation_pct = self
            .decisions
            .iter()
            .filter(|d| d.action.is_open())
            .map(|d| d.allocation_pct)
            .sum();
        self.cash_reserve_pct = (100.0 - self.total_allocation_pct).max(0.0);
    }

    pub fn summary(&self) -> String {
        let parts: Vec<String> = self
            .decisions
            .iter()
            .filter(|d| d.action != DecisionAction::Wait)
            .map(|d| format!("{}:{}", d.symbol, d.action))
            .collect();
        if parts.is_empty() {
            "wait".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Full debate artifacts for one cycle, published for the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateOutcome {
    pub analyst_outputs: Vec<AnalystOutput>,
    pub bull_suggestions: Vec<TraderSuggestion>,
    pub bear_suggestions: Vec<TraderSuggestion>,
    pub rounds_completed: u32,
    pub final_decision: BatchDecision,
    pub debate_summary: String,
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_roundtrip() {
        for action in [
            DecisionAction::OpenLong,
            DecisionAction::OpenShort,
            DecisionAction::CloseLong,
            DecisionAction::CloseShort,
            DecisionAction::Wait,
        ] {
            assert_eq!(DecisionAction::from_str(action.as_str()), Some(action));
        }
        assert_eq!(DecisionAction::from_str("reduce"), None);
    }

    #[test]
    fn test_stop_coherence() {
        let mut d = PortfolioDecision::wait("BTC/USDT", "test");
        d.action = DecisionAction::OpenLong;
        d.stop_loss = Some(95.0);
        d.take_profit = Some(110.0);
        assert!(d.stops_coherent(100.0));
        assert!((d.risk_reward(100.0).unwrap() - 2.0).abs() < 1e-9);

        // short stops are mirrored
        d.action = DecisionAction::OpenShort;
        assert!(!d.stops_coherent(100.0));
        d.stop_loss = Some(105.0);
        d.take_profit = Some(90.0);
        assert!(d.stops_coherent(100.0));
    }

    #[test]
    fn test_batch_renormalize() {
        let symbols = vec!["BTC/USDT".to_string(), "ETH/USDT".to_string()];
        let mut batch = BatchDecision::all_wait(&symbols, "degraded");
        assert_eq!(batch.total_allocation_pct, 0.0);
        assert_eq!(batch.cash_reserve_pct, 100.0);

        batch.decisions[0].action = DecisionAction::OpenLong;
        batch.decisions[0].allocation_pct = 15.0;
        batch.renormalize();
        assert!((batch.total_allocation_pct - 15.0).abs() < 1e-9);
        assert!((batch.cash_reserve_pct - 85.0).abs() < 1e-9);
    }
}
