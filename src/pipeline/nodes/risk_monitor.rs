//! Risk monitor: validates every decision against the bot's limits before
//! the executor may release an order, and proposes trailing-stop amendments.

use async_trait::async_trait;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::bot::RiskLimits;
use crate::domain::decision::{DecisionAction, PortfolioDecision};
use crate::domain::state::CycleState;
use crate::error::{Result, RiskError};
use crate::pipeline::plugin::{NodeError, NodeMetadata, NodePlugin, PluginContext};
use crate::services::{performance, trailing};

pub fn metadata() -> NodeMetadata {
    NodeMetadata {
        name: "risk_monitor".into(),
        display_name: "Risk Monitor".into(),
        category: "monitoring".into(),
        insert_after: Some("debate_decision".into()),
        suggested_order: 6,
        requires_llm: false,
        requires_trader: false,
    }
}

pub fn constructor(_config: serde_json::Value) -> Result<Arc<dyn NodePlugin>> {
    Ok(Arc::new(RiskMonitorNode {
        metadata: metadata(),
    }))
}

struct RiskMonitorNode {
    metadata: NodeMetadata,
}

/// Validate one open decision against the limits, clamping leverage in
/// place. Returns the rejection reason when the order must not go out.
fn check_decision(
    decision: &mut PortfolioDecision,
    limits: &RiskLimits,
    free_balance: Decimal,
    current_price: f64,
    funding_rate: Option<f64>,
    total_exceeded: bool,
) -> std::result::Result<(), String> {
    let symbol = decision.symbol.clone();

    if total_exceeded {
        return Err("total allocation exceeded".to_string());
    }

    if decision.allocation_pct > limits.max_single_allocation_pct {
        let err = RiskError::SingleAllocationExceeded {
            symbol,
            limit: limits.max_single_allocation_pct,
            requested: decision.allocation_pct,
        };
        return Err(format!("per-symbol allocation exceeded: {}", err));
    }

    // Leverage: clamp above max, reject when absent unless defaulting is
    // explicitly enabled
    match decision.leverage {
        Some(lev) if lev > limits.max_leverage => {
            warn!(
                symbol = %symbol,
                leverage = lev,
                max = limits.max_leverage,
                "leverage clamped"
            );
            decision.leverage = Some(limits.max_leverage);
        }
        Some(_) => {}
        None if limits.default_leverage_enabled => {
            decision.leverage = Some(limits.default_leverage);
        }
        None => {
            return Err(RiskError::LeverageMissing { symbol }.to_string());
        }
    }

    // Position size bounds (margin actually committed)
    let alloc = Decimal::from_f64(decision.allocation_pct / 100.0).unwrap_or_default();
    let size_usd = (free_balance * alloc).round_dp(2);
    if size_usd < limits.min_position_size_usd || size_usd > limits.max_position_size_usd {
        let err = RiskError::PositionSizeOutOfBounds {
            symbol,
            size: size_usd,
            min: limits.min_position_size_usd,
            max: limits.max_position_size_usd,
        };
        return Err(err.to_string());
    }

    // Stop placement and risk/reward, when stops are present
    if current_price > 0.0 {
        if !decision.stops_coherent(current_price) {
            return Err(format!("{}: stops on wrong side of entry", symbol));
        }
        if let Some(ratio) = decision.risk_reward(current_price) {
            if ratio < limits.min_risk_reward_ratio {
                let err = RiskError::RiskRewardTooLow {
                    symbol,
                    ratio,
                    min: limits.min_risk_reward_ratio,
                };
                return Err(err.to_string());
            }
        }
    }

    if limits.funding_rate_check_enabled {
        if let Some(rate) = funding_rate {
            let rate_pct = rate.abs() * 100.0;
            if rate_pct > limits.max_funding_rate_pct {
                let err = RiskError::FundingRateExceeded {
                    symbol,
                    rate: rate_pct,
                    limit: limits.max_funding_rate_pct,
                };
                return Err(format!("skipped: funding — {}", err));
            }
        }
    }

    Ok(())
}

#[async_trait]
impl NodePlugin for RiskMonitorNode {
    fn metadata(&self) -> &NodeMetadata {
        &self.metadata
    }

    async fn run(
        &self,
        mut state: CycleState,
        ctx: &PluginContext,
    ) -> std::result::Result<CycleState, NodeError> {
        let limits = state.config_snapshot.risk_limits.clone();

        // ==================== Breakers ====================
        // Refresh the performance window from the store so the breakers see
        // trades closed since the cycle began
        let closed = ctx
            .store
            .recent_closed_trades(state.bot_id, 50)
            .await
            .unwrap_or_default();
        let window = performance::compute_window(&closed, state.balance.total);

        let mut breaker_tripped: Option<String> = None;
        if limits.max_consecutive_losses > 0
            && window.consecutive_losses >= limits.max_consecutive_losses
        {
            let err = RiskError::ConsecutiveLosses {
                count: window.consecutive_losses,
                threshold: limits.max_consecutive_losses,
            };
            warn!("breaker: {}", err);
            state.record_error("risk_monitor", err.to_string());
            if limits.pause_on_consecutive_loss {
                breaker_tripped = Some(err.to_string());
            }
        }
        if limits.max_drawdown_pct > 0.0 && window.max_drawdown_pct >= limits.max_drawdown_pct {
            let err = RiskError::DrawdownExceeded {
                current: window.max_drawdown_pct,
                limit: limits.max_drawdown_pct,
            };
            warn!("breaker: {}", err);
            state.record_error("risk_monitor", err.to_string());
            if limits.pause_on_max_drawdown {
                breaker_tripped = Some(err.to_string());
            }
        }
        state.performance = Some(window);

        if let Some(reason) = breaker_tripped {
            // Every open decision is rejected; the scheduler pauses the bot
            for run in state.runs.values_mut() {
                if run
                    .decision
                    .as_ref()
                    .map(|d| d.action.is_open())
                    .unwrap_or(false)
                {
                    run.skipped = Some(format!("breaker tripped: {}", reason));
                }
            }
            state.pause_requested = Some(reason);
            return Ok(state);
        }

        // ==================== Total allocation ====================
        let total_open: f64 = state
            .runs
            .values()
            .filter(|r| r.skipped.is_none())
            .filter_map(|r| r.decision.as_ref())
            .filter(|d| d.action.is_open())
            .map(|d| d.allocation_pct)
            .sum();
        let total_exceeded = total_open > limits.max_total_allocation_pct;
        if total_exceeded {
            let err = RiskError::TotalAllocationExceeded {
                limit: limits.max_total_allocation_pct,
                requested: total_open,
            };
            warn!("{}", err);
            state.record_error("risk_monitor", err.to_string());
        }

        // ==================== Per-symbol checks ====================
        let free_balance = state.balance.free;
        let symbols: Vec<String> = state.runs.keys().cloned().collect();
        let mut rejections: Vec<String> = Vec::new();

        for symbol in symbols {
            let (current_price, funding_rate) = state
                .runs
                .get(&symbol)
                .and_then(|r| r.indicators.as_ref())
                .map(|i| (i.current_price, i.funding_rate))
                .unwrap_or((0.0, None));

            let Some(run) = state.runs.get_mut(&symbol) else {
                continue;
            };
            if run.skipped.is_some() {
                continue;
            }
            let Some(mut decision) = run.decision.clone() else {
                continue;
            };

            // Wait holds no risk; close actions release it
            if decision.action == DecisionAction::Wait || decision.action.is_close() {
                run.risk_approved = true;
                continue;
            }

            match check_decision(
                &mut decision,
                &limits,
                free_balance,
                current_price,
                funding_rate,
                total_exceeded,
            ) {
                Ok(()) => {
                    run.decision = Some(decision);
                    run.risk_approved = true;
                }
                Err(reason) => {
                    warn!(symbol = %symbol, "decision rejected: {}", reason);
                    run.decision = Some(decision);
                    run.skipped = Some(reason.clone());
                    rejections.push(reason);
                }
            }
        }

        for reason in rejections {
            state.record_error("risk_monitor", reason);
        }

        // ==================== Trailing stops ====================
        if limits.trailing_stop_enabled {
            for position in &state.positions {
                if let Some(proposal) = trailing::evaluate(position, &limits) {
                    info!(
                        symbol = %proposal.symbol,
                        new_stop = %proposal.new_stop_price,
                        pnl_pct = proposal.current_pnl_pct,
                        "trailing stop proposed"
                    );
                    state.trailing_stop_proposals.push(proposal);
                }
            }
        }

        let approved = state.runs.values().filter(|r| r.risk_approved).count();
        info!(approved, total = state.runs.len(), "risk checks complete");
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn open_long(allocation: f64) -> PortfolioDecision {
        PortfolioDecision {
            symbol: "BTC/USDT".into(),
            action: DecisionAction::OpenLong,
            allocation_pct: allocation,
            confidence: 75.0,
            leverage: Some(3),
            stop_loss: Some(95.0),
            take_profit: Some(110.0),
            reasoning: "test".into(),
        }
    }

    fn limits() -> RiskLimits {
        RiskLimits::default()
    }

    #[test]
    fn test_clean_decision_passes() {
        let mut d = open_long(5.0);
        let verdict = check_decision(&mut d, &limits(), dec!(1000), 100.0, Some(0.0001), false);
        assert!(verdict.is_ok());
        assert_eq!(d.leverage, Some(3));
    }

    #[test]
    fn test_per_symbol_cap_rejects() {
        let mut d = open_long(50.0); // cap is 30
        let verdict = check_decision(&mut d, &limits(), dec!(1000), 100.0, None, false);
        let reason = verdict.unwrap_err();
        assert!(reason.contains("per-symbol allocation exceeded"));
    }

    #[test]
    fn test_total_cap_rejects_all() {
        let mut d = open_long(5.0);
        let verdict = check_decision(&mut d, &limits(), dec!(1000), 100.0, None, true);
        assert_eq!(verdict.unwrap_err(), "total allocation exceeded");
    }

    #[test]
    fn test_leverage_clamped_not_rejected() {
        let mut d = open_long(5.0);
        d.leverage = Some(50); // max is 10
        let verdict = check_decision(&mut d, &limits(), dec!(1000), 100.0, None, false);
        assert!(verdict.is_ok());
        assert_eq!(d.leverage, Some(10));
    }

    #[test]
    fn test_missing_leverage_rejected_unless_enabled() {
        let mut d = open_long(5.0);
        d.leverage = None;
        let verdict = check_decision(&mut d, &limits(), dec!(1000), 100.0, None, false);
        assert!(verdict.is_err());

        let mut enabled = limits();
        enabled.default_leverage_enabled = true;
        let mut d = open_long(5.0);
        d.leverage = None;
        let verdict = check_decision(&mut d, &enabled, dec!(1000), 100.0, None, false);
        assert!(verdict.is_ok());
        assert_eq!(d.leverage, Some(enabled.default_leverage));
    }

    #[test]
    fn test_size_bounds() {
        // 5% of $100 = $5, below the $10 floor
        let mut d = open_long(5.0);
        let verdict = check_decision(&mut d, &limits(), dec!(100), 100.0, None, false);
        assert!(verdict.unwrap_err().contains("position size"));
    }

    #[test]
    fn test_risk_reward_floor() {
        let mut d = open_long(5.0);
        d.stop_loss = Some(90.0);
        d.take_profit = Some(105.0); // rr = 0.5
        let verdict = check_decision(&mut d, &limits(), dec!(1000), 100.0, None, false);
        assert!(verdict.unwrap_err().contains("risk/reward"));
    }

    #[test]
    fn test_incoherent_stops_rejected() {
        let mut d = open_long(5.0);
        d.stop_loss = Some(110.0); // above entry for a long
        d.take_profit = Some(120.0);
        let verdict = check_decision(&mut d, &limits(), dec!(1000), 100.0, None, false);
        assert!(verdict.unwrap_err().contains("stops"));
    }

    #[test]
    fn test_funding_guard() {
        // 0.08% funding against a 0.05% limit
        let mut strict = limits();
        strict.max_funding_rate_pct = 0.05;
        let mut d = open_long(5.0);
        let verdict = check_decision(&mut d, &strict, dec!(1000), 100.0, Some(0.0008), false);
        let reason = verdict.unwrap_err();
        assert!(reason.contains("skipped: funding"));

        // Disabled guard lets it through
        strict.funding_rate_check_enabled = false;
        let mut d = open_long(5.0);
        assert!(
            check_decision(&mut d, &strict, dec!(1000), 100.0, Some(0.0008), false).is_ok()
        );
    }
}
