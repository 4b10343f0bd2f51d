//! Quantitative signal scoring.
//!
//! Combines trend, momentum, volume and sentiment sub-scores into a single
//! 0-100 score; the quant filter node drops symbols below the bot's
//! threshold before any LLM work is spent on them.

use crate::domain::bot::QuantWeights;
use crate::domain::market::{IndicatorSet, QuantScore};

fn clamp_score(v: f64) -> f64 {
    v.clamp(0.0, 100.0)
}

/// Trend sub-score from EMA posture and the higher-timeframe bias.
fn trend_score(ind: &IndicatorSet) -> f64 {
    let mut score: f64 = 50.0;

    if ind.current_price > ind.ema_20 {
        score += 20.0;
    } else if ind.current_price < ind.ema_20 {
        score -= 20.0;
    }

    score += ind.htf_trend as f64 * 20.0;

    if ind.macd.histogram > 0.0 {
        score += 10.0;
    } else if ind.macd.histogram < 0.0 {
        score -= 10.0;
    }

    clamp_score(score)
}

/// Momentum sub-score from RSI posture and MACD cross.
fn momentum_score(ind: &IndicatorSet) -> f64 {
    let mut score: f64 = 50.0;

    // RSI mid-band is tradeable momentum, extremes are exhaustion
    match ind.rsi_14 {
        r if (55.0..=70.0).contains(&r) => score += 25.0,
        r if (30.0..45.0).contains(&r) => score -= 15.0,
        r if r > 80.0 || r < 20.0 => score -= 25.0,
        _ => {}
    }

    if ind.macd.macd > ind.macd.signal {
        score += 15.0;
    } else {
        score -= 15.0;
    }

    clamp_score(score)
}

/// Volume sub-score from relative volume expansion.
fn volume_score(ind: &IndicatorSet) -> f64 {
    let score = match ind.volume_ratio {
        v if v >= 2.0 => 90.0,
        v if v >= 1.5 => 75.0,
        v if v >= 1.0 => 60.0,
        v if v >= 0.5 => 40.0,
        _ => 20.0,
    };
    clamp_score(score)
}

/// Sentiment sub-score from funding-rate skew and open-interest presence.
///
/// Deep positive funding means crowded longs (contrarian negative); mildly
/// negative funding pays the long side.
fn sentiment_score(ind: &IndicatorSet) -> f64 {
    let mut score: f64 = 50.0;

    if let Some(funding) = ind.funding_rate {
        let funding_pct = funding * 100.0;
        if funding_pct > 0.05 {
            score -= 20.0;
        } else if funding_pct < -0.01 {
            score += 15.0;
        }
    }

    if ind.open_interest.is_some() {
        score += 5.0;
    }

    clamp_score(score)
}

/// Compute the weighted quant score for one symbol.
pub fn score(ind: &IndicatorSet, weights: &QuantWeights) -> QuantScore {
    let trend = trend_score(ind);
    let momentum = momentum_score(ind);
    let volume = volume_score(ind);
    let sentiment = sentiment_score(ind);

    let total = trend * weights.trend
        + momentum * weights.momentum
        + volume * weights.volume
        + sentiment * weights.sentiment;

    QuantScore {
        total: clamp_score(total),
        trend,
        momentum,
        volume,
        sentiment,
    }
}
