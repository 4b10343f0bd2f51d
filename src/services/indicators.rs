//! Technical indicators over OHLCV slices.
//!
//! Pure functions; prices come in as Decimal candles and are computed in f64
//! since indicator outputs only feed scoring and prompts.

use crate::domain::market::{BollingerBands, Candle, IndicatorSet, MacdValue};

/// Minimum candles required to compute the full set.
pub const MIN_CANDLES: usize = 35;

fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(Candle::close_f64).collect()
}

/// Simple moving average over the last `period` values.
pub fn sma(values: &[f64], period: usize) -> f64 {
    if values.len() < period || period == 0 {
        return 0.0;
    }
    let window = &values[values.len() - period..];
    window.iter().sum::<f64>() / period as f64
}

/// Exponential moving average over the whole series.
pub fn ema(values: &[f64], period: usize) -> f64 {
    if values.is_empty() || period == 0 {
        return 0.0;
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut ema = values[0];
    for v in &values[1..] {
        ema = v * k + ema * (1.0 - k);
    }
    ema
}

/// Wilder-smoothed RSI.
pub fn rsi(values: &[f64], period: usize) -> f64 {
    if values.len() <= period {
        return 50.0;
    }
    let mut gains = 0.0;
    let mut losses = 0.0;
    for w in values[..=period].windows(2) {
        let delta = w[1] - w[0];
        if delta > 0.0 {
            gains += delta;
        } else {
            losses -= delta;
        }
    }
    let mut avg_gain = gains / period as f64;
    let mut avg_loss = losses / period as f64;

    for w in values[period..].windows(2) {
        let delta = w[1] - w[0];
        let (gain, loss) = if delta > 0.0 {
            (delta, 0.0)
        } else {
            (0.0, -delta)
        };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

/// Full-series EMA track (helper for MACD signal line).
fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut ema = values[0];
    out.push(ema);
    for v in &values[1..] {
        ema = v * k + ema * (1.0 - k);
        out.push(ema);
    }
    out
}

/// MACD(12, 26, 9).
pub fn macd(values: &[f64]) -> MacdValue {
    if values.len() < 26 {
        return MacdValue::default();
    }
    let fast = ema_series(values, 12);
    let slow = ema_series(values, 26);
    let macd_line: Vec<f64> = fast.iter().zip(&slow).map(|(f, s)| f - s).collect();
    let signal = ema_series(&macd_line, 9);

    let m = *macd_line.last().unwrap_or(&0.0);
    let s = *signal.last().unwrap_or(&0.0);
    MacdValue {
        macd: m,
        signal: s,
        histogram: m - s,
    }
}

/// Bollinger bands (20-period SMA, 2 standard deviations).
pub fn bollinger(values: &[f64], period: usize, num_std: f64) -> BollingerBands {
    if values.len() < period || period == 0 {
        return BollingerBands::default();
    }
    let window = &values[values.len() - period..];
    let mean = window.iter().sum::<f64>() / period as f64;
    let variance = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / period as f64;
    let std = variance.sqrt();
    BollingerBands {
        upper: mean + num_std * std,
        middle: mean,
        lower: mean - num_std * std,
    }
}

/// Average true range.
pub fn atr(candles: &[Candle], period: usize) -> f64 {
    use rust_decimal::prelude::ToPrimitive;
    if candles.len() <= period {
        return 0.0;
    }
    let mut trs = Vec::with_capacity(candles.len() - 1);
    for w in candles.windows(2) {
        let high = w[1].high.to_f64().unwrap_or(0.0);
        let low = w[1].low.to_f64().unwrap_or(0.0);
        let prev_close = w[0].close.to_f64().unwrap_or(0.0);
        let tr = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());
        trs.push(tr);
    }
    sma(&trs, period)
}

/// Last-candle volume relative to the 20-candle average.
pub fn volume_ratio(candles: &[Candle]) -> f64 {
    use rust_decimal::prelude::ToPrimitive;
    if candles.len() < 21 {
        return 1.0;
    }
    let volumes: Vec<f64> = candles
        .iter()
        .map(|c| c.volume.to_f64().unwrap_or(0.0))
        .collect();
    let avg = sma(&volumes[..volumes.len() - 1], 20);
    if avg == 0.0 {
        return 1.0;
    }
    volumes.last().unwrap() / avg
}

/// Higher-timeframe trend from a slower candle series: +1 when price is above
/// a rising 20-EMA, -1 when below a falling one, 0 otherwise.
pub fn htf_trend(candles: &[Candle]) -> i8 {
    if candles.len() < 21 {
        return 0;
    }
    let values = closes(candles);
    let ema_now = ema(&values, 20);
    let ema_prev = ema(&values[..values.len() - 1], 20);
    let price = *values.last().unwrap();

    if price > ema_now && ema_now > ema_prev {
        1
    } else if price < ema_now && ema_now < ema_prev {
        -1
    } else {
        0
    }
}

/// Compute the full indicator set for one symbol.
///
/// `primary` is the fast timeframe driving entries; `higher` (when present)
/// is a slower series used only for the trend bias.
pub fn compute(primary: &[Candle], higher: Option<&[Candle]>) -> IndicatorSet {
    let values = closes(primary);
    let current_price = values.last().copied().unwrap_or(0.0);

    IndicatorSet {
        current_price,
        rsi_14: rsi(&values, 14),
        macd: macd(&values),
        bollinger: bollinger(&values, 20, 2.0),
        atr_14: atr(primary, 14),
        sma_20: sma(&values, 20),
        ema_20: ema(&values, 20),
        volume_ratio: volume_ratio(primary),
        htf_trend: higher.map(htf_trend).unwrap_or(0),
        funding_rate: None,
        open_interest: None,
    }
}
