//! Execution: releases risk-approved decisions to the exchange and keeps
//! trade history consistent.
//!
//! `create_order` is not idempotent at the venue, so every decision is
//! de-duplicated by `(cycle_id, symbol, action)` against trade history before
//! anything is sent.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

use crate::adapters::store::TradeClose;
use crate::domain::decision::{DecisionAction, PortfolioDecision};
use crate::domain::order::{
    OrderRequest, OrderType, PositionSide, TradeRecord, TradeStatus,
};
use crate::domain::state::{CycleState, ExecutionOutcome, ExecutionStatus};
use crate::error::Result;
use crate::pipeline::plugin::{NodeError, NodeMetadata, NodePlugin, PluginContext};

pub fn metadata() -> NodeMetadata {
    NodeMetadata {
        name: "execution".into(),
        display_name: "Order Execution".into(),
        category: "execution".into(),
        insert_after: Some("risk_monitor".into()),
        suggested_order: 7,
        requires_llm: false,
        requires_trader: true,
    }
}

pub fn constructor(_config: serde_json::Value) -> Result<Arc<dyn NodePlugin>> {
    Ok(Arc::new(ExecutionNode {
        metadata: metadata(),
    }))
}

struct ExecutionNode {
    metadata: NodeMetadata,
}

impl ExecutionNode {
    async fn reference_price(
        ctx: &PluginContext,
        state: &CycleState,
        symbol: &str,
    ) -> Result<Decimal> {
        if let Some(price) = state
            .runs
            .get(symbol)
            .and_then(|r| r.indicators.as_ref())
            .and_then(|i| Decimal::from_f64(i.current_price))
        {
            if price > Decimal::ZERO {
                return Ok(price);
            }
        }
        Ok(ctx.market.ticker(symbol).await?.last)
    }

    async fn execute_open(
        ctx: &PluginContext,
        state: &CycleState,
        decision: &PortfolioDecision,
    ) -> Result<ExecutionOutcome> {
        let symbol = &decision.symbol;
        let side = decision
            .action
            .position_side()
            .expect("open action has a side");

        if ctx.store.open_trade(state.bot_id, symbol).await?.is_some() {
            return Ok(ExecutionOutcome::skipped("open trade already on book"));
        }

        let leverage = decision.leverage.unwrap_or(1);
        let price = Self::reference_price(ctx, state, symbol).await?;
        let alloc = Decimal::from_f64(decision.allocation_pct / 100.0).unwrap_or_default();
        let margin = state.balance.free * alloc;
        let notional = margin * Decimal::from(leverage);
        if price.is_zero() || notional.is_zero() {
            return Ok(ExecutionOutcome::skipped("degenerate size or price"));
        }
        let amount = (notional / price).round_dp(8);

        let request = OrderRequest::market(symbol.clone(), side.entry_order_side(), amount)
            .with_leverage(leverage)
            .with_stops(
                decision.stop_loss.and_then(Decimal::from_f64),
                decision.take_profit.and_then(Decimal::from_f64),
            );

        let order = ctx.exchange.create_order(&request).await?;
        let entry_price = order.average_price.unwrap_or(price);

        let trade = TradeRecord {
            id: None,
            bot_id: state.bot_id,
            symbol: symbol.clone(),
            side,
            action: decision.action,
            entry_price,
            exit_price: None,
            amount: order.filled,
            leverage,
            pnl_usd: None,
            pnl_percent: None,
            fee_paid: order.fee,
            status: TradeStatus::Open,
            opened_at: Utc::now(),
            closed_at: None,
            cycle_id: state.cycle_id,
            order_id: Some(order.id.clone()),
        };
        if ctx.store.insert_trade(&trade).await?.is_none() {
            warn!(symbol = %symbol, "trade row already present for this cycle");
        }

        info!(
            symbol = %symbol,
            side = %side,
            amount = %order.filled,
            price = %entry_price,
            "position opened"
        );
        Ok(ExecutionOutcome {
            status: ExecutionStatus::Success,
            message: format!("opened {} {}", side, symbol),
            order_id: Some(order.id),
            executed_price: Some(entry_price),
            executed_amount: Some(order.filled),
            fee_paid: order.fee,
        })
    }

    async fn execute_close(
        ctx: &PluginContext,
        state: &CycleState,
        decision: &PortfolioDecision,
    ) -> Result<ExecutionOutcome> {
        let symbol = &decision.symbol;
        let Some(open) = ctx.store.open_trade(state.bot_id, symbol).await? else {
            return Ok(ExecutionOutcome::skipped("no open trade to close"));
        };

        // close_long only closes a long; a mismatched side is a stale decision
        if decision.action.position_side() != Some(open.side) {
            return Ok(ExecutionOutcome::skipped(format!(
                "decision closes {} but open side is {}",
                decision.action,
                open.side
            )));
        }

        let request = OrderRequest::market(
            symbol.clone(),
            open.side.entry_order_side().opposite(),
            open.amount,
        )
        .reduce_only();
        let order = ctx.exchange.create_order(&request).await?;
        let exit_price = order
            .average_price
            .unwrap_or(Self::reference_price(ctx, state, symbol).await?);

        let gross = match open.side {
            PositionSide::Long => (exit_price - open.entry_price) * open.amount,
            PositionSide::Short => (open.entry_price - exit_price) * open.amount,
        };
        let fee = order.fee.unwrap_or_default();
        let pnl = gross - fee;
        let pnl_percent = if open.entry_price.is_zero() {
            0.0
        } else {
            use rust_decimal::prelude::ToPrimitive;
            ((exit_price - open.entry_price) / open.entry_price)
                .to_f64()
                .unwrap_or(0.0)
                * 100.0
                * match open.side {
                    PositionSide::Long => 1.0,
                    PositionSide::Short => -1.0,
                }
        };

        ctx.store
            .close_trade(&TradeClose {
                bot_id: state.bot_id,
                symbol: symbol.clone(),
                exit_price,
                pnl_usd: pnl,
                pnl_percent,
                fee_paid: fee,
                closed_at: Utc::now(),
            })
            .await?;

        info!(
            symbol = %symbol,
            pnl = %pnl,
            pnl_pct = pnl_percent,
            "position closed"
        );
        Ok(ExecutionOutcome {
            status: ExecutionStatus::Success,
            message: format!("closed {} pnl ${}", symbol, pnl.round_dp(2)),
            order_id: Some(order.id),
            executed_price: Some(exit_price),
            executed_amount: Some(open.amount),
            fee_paid: order.fee,
        })
    }

    /// Issue stop-amend orders for the risk monitor's trailing proposals.
    /// Simulated modes have no resting orders to amend, so the proposal is
    /// only journaled there.
    async fn apply_trailing_stops(ctx: &PluginContext, state: &mut CycleState) {
        let proposals = state.trailing_stop_proposals.clone();
        for proposal in proposals {
            if state.config_snapshot.trading_mode.is_simulated() {
                info!(
                    symbol = %proposal.symbol,
                    stop = %proposal.new_stop_price,
                    "trailing stop recorded (simulated mode)"
                );
                continue;
            }

            let Some(position) = state.position_for(&proposal.symbol).cloned() else {
                continue;
            };
            let mut request = OrderRequest::market(
                proposal.symbol.clone(),
                position.side.entry_order_side().opposite(),
                position.size,
            )
            .reduce_only();
            request.order_type = OrderType::Stop;
            request.price = Some(proposal.new_stop_price);

            match ctx.exchange.create_order(&request).await {
                Ok(order) => info!(
                    symbol = %proposal.symbol,
                    order_id = %order.id,
                    stop = %proposal.new_stop_price,
                    "trailing stop amended"
                ),
                Err(e) => {
                    warn!(symbol = %proposal.symbol, "trailing stop amend failed: {}", e);
                    state.record_error(
                        "execution",
                        format!("{}: trailing stop amend failed: {}", proposal.symbol, e),
                    );
                }
            }
        }
    }
}

#[async_trait]
impl NodePlugin for ExecutionNode {
    fn metadata(&self) -> &NodeMetadata {
        &self.metadata
    }

    async fn run(
        &self,
        mut state: CycleState,
        ctx: &PluginContext,
    ) -> std::result::Result<CycleState, NodeError> {
        let symbols: Vec<String> = state.runs.keys().cloned().collect();

        for symbol in symbols {
            if ctx.is_cancelled() {
                return Err(NodeError::fatal("cancelled"));
            }

            let Some(run) = state.runs.get(&symbol) else {
                continue;
            };
            if run.skipped.is_some() || !run.risk_approved {
                continue;
            }
            let Some(decision) = run.decision.clone() else {
                continue;
            };

            let outcome = if decision.action == DecisionAction::Wait {
                ExecutionOutcome::skipped("wait")
            } else if ctx
                .store
                .trade_exists(state.bot_id, state.cycle_id, &symbol, decision.action)
                .await
                .map_err(NodeError::from)?
            {
                // Reprocessing this cycle must not double-send
                ExecutionOutcome::skipped("already executed for this cycle")
            } else {
                let result = if decision.action.is_open() {
                    Self::execute_open(ctx, &state, &decision).await
                } else {
                    Self::execute_close(ctx, &state, &decision).await
                };
                match result {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!(symbol = %symbol, "execution failed: {}", e);
                        state.record_error("execution", format!("{}: {}", symbol, e));
                        ExecutionOutcome::failed(e.to_string())
                    }
                }
            };

            if let Some(run) = state.runs.get_mut(&symbol) {
                run.execution = Some(outcome);
            }
        }

        Self::apply_trailing_stops(ctx, &mut state).await;

        // Refresh the account view so the published status reflects fills
        match ctx.market.balance().await {
            Ok(balance) => state.balance = balance,
            Err(e) => warn!("balance refresh failed after execution: {}", e),
        }
        match ctx.exchange.fetch_positions().await {
            Ok(positions) => state.positions = positions,
            Err(e) => warn!("position refresh failed after execution: {}", e),
        }

        let executed = state
            .runs
            .values()
            .filter(|r| {
                r.execution
                    .as_ref()
                    .map(|e| e.status == ExecutionStatus::Success)
                    .unwrap_or(false)
            })
            .count();
        info!(executed, "execution pass complete");
        Ok(state)
    }
}
