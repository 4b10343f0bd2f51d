//! REST poll provider: on-demand market data through the cache and the
//! rate-limited client.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;

use crate::domain::market::{
    AccountBalance, Candle, MarketCatalogue, OrderbookSnapshot, Ticker,
};
use crate::error::Result;
use crate::exchange::RateLimitedClient;

use super::cache::MarketCache;

const MARKETS_KEY: &str = "catalogue";

/// Unified read interface the pipeline consumes for REST-sourced data.
///
/// Every call checks the cache first; misses go out through the rate limiter
/// and are written back under the namespace TTL.
pub struct MarketDataService {
    client: Arc<RateLimitedClient>,
    cache: Arc<MarketCache>,
}

impl MarketDataService {
    pub fn new(client: Arc<RateLimitedClient>, cache: Arc<MarketCache>) -> Self {
        Self { client, cache }
    }

    pub fn client(&self) -> &Arc<RateLimitedClient> {
        &self.client
    }

    pub fn cache(&self) -> &Arc<MarketCache> {
        &self.cache
    }

    fn ohlcv_namespace(timeframe: &str) -> String {
        format!("ohlcv_{}", timeframe)
    }

    pub async fn markets(&self) -> Result<MarketCatalogue> {
        if let Some(catalogue) = self.cache.get_as::<MarketCatalogue>("markets", MARKETS_KEY) {
            return Ok(catalogue);
        }
        let catalogue = self.client.load_markets().await?;
        self.cache.set_as("markets", MARKETS_KEY, &catalogue);
        debug!(markets = catalogue.len(), "market catalogue refreshed");
        Ok(catalogue)
    }

    pub async fn ohlcv(&self, symbol: &str, timeframe: &str, limit: u32) -> Result<Vec<Candle>> {
        let namespace = Self::ohlcv_namespace(timeframe);
        let key = format!("{}:{}:{}", symbol, timeframe, limit);

        if let Some(candles) = self.cache.get_as::<Vec<Candle>>(&namespace, &key) {
            return Ok(candles);
        }

        let candles = self.client.fetch_ohlcv(symbol, timeframe, limit).await?;
        self.cache.set_as(&namespace, &key, &candles);
        Ok(candles)
    }

    pub async fn ticker(&self, symbol: &str) -> Result<Ticker> {
        if let Some(ticker) = self.cache.get_as::<Ticker>("tickers", symbol) {
            return Ok(ticker);
        }
        let ticker = self.client.fetch_ticker(symbol).await?;
        self.cache.set_as("tickers", symbol, &ticker);
        Ok(ticker)
    }

    pub async fn orderbook(&self, symbol: &str, depth: u32) -> Result<OrderbookSnapshot> {
        let key = format!("{}:{}", symbol, depth);
        if let Some(book) = self.cache.get_as::<OrderbookSnapshot>("orderbook", &key) {
            return Ok(book);
        }
        let book = self.client.fetch_orderbook(symbol, depth).await?;
        self.cache.set_as("orderbook", &key, &book);
        Ok(book)
    }

    pub async fn funding_rate(&self, symbol: &str) -> Result<f64> {
        let key = format!("funding:{}", symbol);
        if let Some(rate) = self.cache.get_as::<f64>("open_interests", &key) {
            return Ok(rate);
        }
        let rate = self.client.fetch_funding_rate(symbol).await?;
        let rate = rate.to_f64().unwrap_or(0.0);
        self.cache.set_as("open_interests", &key, &rate);
        Ok(rate)
    }

    pub async fn open_interest(&self, symbol: &str) -> Result<f64> {
        let key = format!("oi:{}", symbol);
        if let Some(oi) = self.cache.get_as::<f64>("open_interests", &key) {
            return Ok(oi);
        }
        let oi: Decimal = self.client.fetch_open_interest(symbol).await?;
        let oi = oi.to_f64().unwrap_or(0.0);
        self.cache.set_as("open_interests", &key, &oi);
        Ok(oi)
    }

    /// Account balance is always fetched live; staleness here compounds into
    /// sizing errors.
    pub async fn balance(&self) -> Result<AccountBalance> {
        self.client.fetch_balance().await
    }
}
