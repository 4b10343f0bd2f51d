//! Performance metrics over closed trade history.
//!
//! The resulting window is injected into debate prompts and consumed by the
//! consecutive-loss and drawdown breakers.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::domain::order::TradeRecord;
use crate::domain::state::PerformanceWindow;

/// Count of losses at the head of a newest-first closed-trade list.
pub fn consecutive_losses(closed_newest_first: &[TradeRecord]) -> u32 {
    let mut streak = 0;
    for trade in closed_newest_first {
        match trade.pnl_usd {
            Some(pnl) if pnl < Decimal::ZERO => streak += 1,
            _ => break,
        }
    }
    streak
}

/// Max drawdown (%) over the cumulative PnL curve, oldest-first.
fn max_drawdown_pct(returns_usd: &[f64], initial_balance: f64) -> f64 {
    if returns_usd.is_empty() || initial_balance <= 0.0 {
        return 0.0;
    }
    let mut equity = initial_balance;
    let mut peak = initial_balance;
    let mut max_dd = 0.0f64;
    for r in returns_usd {
        equity += r;
        peak = peak.max(equity);
        if peak > 0.0 {
            let dd = (peak - equity) / peak * 100.0;
            max_dd = max_dd.max(dd);
        }
    }
    max_dd
}

/// Annualization-free Sharpe over per-trade percentage returns.
fn sharpe_ratio(returns_pct: &[f64]) -> f64 {
    if returns_pct.len() < 2 {
        return 0.0;
    }
    let n = returns_pct.len() as f64;
    let mean = returns_pct.iter().sum::<f64>() / n;
    let variance = returns_pct.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std = variance.sqrt();
    if std == 0.0 {
        return 0.0;
    }
    mean / std
}

/// Compute the rolling performance window from closed trades.
///
/// `closed_newest_first` is the order the store returns them in; internal
/// curve math runs oldest-first.
pub fn compute_window(
    closed_newest_first: &[TradeRecord],
    initial_balance: Decimal,
) -> PerformanceWindow {
    let total_trades = closed_newest_first.len() as u32;
    if total_trades == 0 {
        return PerformanceWindow::default();
    }

    let mut winning = 0u32;
    let mut losing = 0u32;
    let mut gross_profit = 0.0f64;
    let mut gross_loss = 0.0f64;
    let mut returns_usd: Vec<f64> = Vec::with_capacity(closed_newest_first.len());
    let mut returns_pct: Vec<f64> = Vec::with_capacity(closed_newest_first.len());

    for trade in closed_newest_first.iter().rev() {
        let pnl = trade
            .pnl_usd
            .map(|p| p.to_f64().unwrap_or(0.0))
            .unwrap_or(0.0);
        returns_usd.push(pnl);
        returns_pct.push(trade.pnl_percent.unwrap_or(0.0));
        if pnl > 0.0 {
            winning += 1;
            gross_profit += pnl;
        } else if pnl < 0.0 {
            losing += 1;
            gross_loss += -pnl;
        }
    }

    let total_return_usd: f64 = returns_usd.iter().sum();
    let win_rate = winning as f64 / total_trades as f64 * 100.0;
    let avg_return_pct = returns_pct.iter().sum::<f64>() / total_trades as f64;
    let profit_factor = if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else if gross_profit > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    PerformanceWindow {
        total_trades,
        winning_trades: winning,
        losing_trades: losing,
        win_rate,
        avg_return_pct,
        total_return_usd,
        sharpe_ratio: sharpe_ratio(&returns_pct),
        max_drawdown_pct: max_drawdown_pct(
            &returns_usd,
            initial_balance.to_f64().unwrap_or(0.0),
        ),
        profit_factor: if profit_factor.is_finite() {
            profit_factor
        } else {
            99.0
        },
        consecutive_losses: consecutive_losses(closed_newest_first),
    }
}
