//! Trailing stop arithmetic.
//!
//! When a position's unrealized PnL crosses the trigger threshold the risk
//! monitor proposes moving the stop to price * (1 -/+ distance), constrained
//! to lock in at least `lock_profit_pct`. The proposal is written into
//! CycleState; the executor issues the amend order.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use crate::domain::bot::RiskLimits;
use crate::domain::order::{Position, PositionSide};
use crate::domain::state::TrailingStopProposal;

/// Evaluate one position against the trailing-stop policy.
pub fn evaluate(position: &Position, limits: &RiskLimits) -> Option<TrailingStopProposal> {
    if !limits.trailing_stop_enabled {
        return None;
    }

    let pnl_pct = position.unrealized_pnl_pct();
    if pnl_pct < limits.trailing_stop_trigger_pct {
        return None;
    }

    let distance = Decimal::from_f64(limits.trailing_stop_distance_pct / 100.0)?;
    let lock = Decimal::from_f64(limits.trailing_stop_lock_profit_pct / 100.0)?;
    let one = Decimal::ONE;

    // Stop trails the mark by `distance`, but never gives back more than the
    // floor that locks `lock_profit_pct` over entry.
    let (trailed, floor) = match position.side {
        PositionSide::Long => (
            position.mark_price * (one - distance),
            position.entry_price * (one + lock),
        ),
        PositionSide::Short => (
            position.mark_price * (one + distance),
            position.entry_price * (one - lock),
        ),
    };

    let new_stop = match position.side {
        PositionSide::Long => trailed.max(floor),
        PositionSide::Short => trailed.min(floor),
    };

    Some(TrailingStopProposal {
        symbol: position.symbol.clone(),
        side: position.side,
        current_pnl_pct: pnl_pct,
        new_stop_price: new_stop.round_dp(8),
        locks_profit_pct: limits.trailing_stop_lock_profit_pct,
    })
}
