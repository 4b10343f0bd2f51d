//! Market data records fed from the exchange adapter into the pipeline.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single OHLCV candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    pub fn close_f64(&self) -> f64 {
        self.close.to_f64().unwrap_or(0.0)
    }
}

/// Latest quote for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last: Decimal,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

/// Depth snapshot, price/size pairs best-first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderbookSnapshot {
    pub symbol: String,
    pub bids: Vec<(Decimal, Decimal)>,
    pub asks: Vec<(Decimal, Decimal)>,
    pub timestamp: DateTime<Utc>,
}

impl OrderbookSnapshot {
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|(p, _)| *p)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|(p, _)| *p)
    }
}

/// A public trade from the trades stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicTrade {
    pub symbol: String,
    pub price: Decimal,
    pub amount: Decimal,
    pub is_buyer_maker: bool,
    pub timestamp: DateTime<Utc>,
}

/// One tradeable market from the venue catalogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketInfo {
    pub symbol: String,
    pub base: String,
    pub quote: String,
    pub active: bool,
    /// 24h quote-denominated volume, used for coin selection ranking
    pub quote_volume_24h: Decimal,
    pub min_amount: Option<Decimal>,
    pub price_precision: Option<u32>,
}

/// The full market catalogue loaded at worker init and refreshed via cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketCatalogue {
    pub markets: HashMap<String, MarketInfo>,
}

impl MarketCatalogue {
    pub fn len(&self) -> usize {
        self.markets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }

    pub fn get(&self, symbol: &str) -> Option<&MarketInfo> {
        self.markets.get(symbol)
    }
}

/// Account balance in the settlement currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub currency: String,
    pub free: Decimal,
    pub used: Decimal,
    pub total: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl AccountBalance {
    pub fn zero(currency: impl Into<String>) -> Self {
        Self {
            currency: currency.into(),
            free: Decimal::ZERO,
            used: Decimal::ZERO,
            total: Decimal::ZERO,
            timestamp: Utc::now(),
        }
    }
}

/// MACD line, signal line and histogram.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MacdValue {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Bollinger band levels.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Computed technical indicators for one symbol, one cycle.
///
/// Indicator values feed prompts and scoring only, so f64 is fine here;
/// everything that touches money stays Decimal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub current_price: f64,
    pub rsi_14: f64,
    pub macd: MacdValue,
    pub bollinger: BollingerBands,
    pub atr_14: f64,
    pub sma_20: f64,
    pub ema_20: f64,
    /// Last-candle volume over the 20-candle average
    pub volume_ratio: f64,
    /// Higher-timeframe trend direction: +1 up, -1 down, 0 flat
    pub htf_trend: i8,
    pub funding_rate: Option<f64>,
    pub open_interest: Option<f64>,
}

/// Weighted quant score with its component breakdown, all in [0, 100].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuantScore {
    pub total: f64,
    pub trend: f64,
    pub momentum: f64,
    pub volume: f64,
    pub sentiment: f64,
}
