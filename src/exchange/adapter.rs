//! Abstract exchange capabilities consumed by the core.
//!
//! The venue protocol binding lives outside this crate; integrators register
//! an [`ExchangeFactory`] that builds adapters from exchange rows. Paper mode
//! composes any live adapter with the simulated fill layer in
//! [`super::paper`].

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::domain::bot::ExchangeConfig;
use crate::domain::market::{
    AccountBalance, Candle, MarketCatalogue, OrderbookSnapshot, PublicTrade, Ticker,
};
use crate::domain::order::{Order, OrderRequest, Position};
use crate::error::Result;

/// WebSocket channel kinds the stream manager maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamChannel {
    Ticker,
    Trades,
}

impl StreamChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamChannel::Ticker => "ticker",
            StreamChannel::Trades => "trades",
        }
    }
}

impl std::fmt::Display for StreamChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Abstract capabilities of one exchange connection.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Venue kind, e.g. "binance". Drives rate-limit quota selection.
    fn kind(&self) -> &str;

    fn is_testnet(&self) -> bool;

    async fn load_markets(&self) -> Result<MarketCatalogue>;

    async fn fetch_ohlcv(&self, symbol: &str, timeframe: &str, limit: u32) -> Result<Vec<Candle>>;

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker>;

    async fn fetch_orderbook(&self, symbol: &str, depth: u32) -> Result<OrderbookSnapshot>;

    async fn fetch_open_interest(&self, symbol: &str) -> Result<Decimal>;

    async fn fetch_funding_rate(&self, symbol: &str) -> Result<Decimal>;

    async fn fetch_balance(&self) -> Result<AccountBalance>;

    async fn fetch_positions(&self) -> Result<Vec<Position>>;

    async fn create_order(&self, request: &OrderRequest) -> Result<Order>;

    async fn cancel_order(&self, order_id: &str, symbol: &str) -> Result<()>;

    /// Open a ticker stream. Terminated by [`Self::unwatch`] or drop.
    async fn watch_ticker(&self, symbol: &str) -> Result<BoxStream<'static, Result<Ticker>>>;

    /// Open a public-trades stream. Terminated by [`Self::unwatch`] or drop.
    async fn watch_trades(&self, symbol: &str) -> Result<BoxStream<'static, Result<PublicTrade>>>;

    /// Tell the venue to stop a subscription (best effort).
    async fn unwatch(&self, symbol: &str, channel: StreamChannel) -> Result<()>;
}

/// Builds adapters from exchange configuration rows.
///
/// The default process wires concrete venue bindings in here; tests register
/// mocks. Modelled as an explicit injected value rather than a process-wide
/// registry.
pub trait ExchangeFactory: Send + Sync {
    fn create(&self, config: &ExchangeConfig) -> Result<Arc<dyn ExchangeAdapter>>;
}

/// Factory that refuses every venue; the binary replaces this with real
/// bindings at startup and tests inject mocks.
pub struct UnboundExchangeFactory;

impl ExchangeFactory for UnboundExchangeFactory {
    fn create(&self, config: &ExchangeConfig) -> Result<Arc<dyn ExchangeAdapter>> {
        Err(crate::error::ConclaveError::InvalidConfig(format!(
            "no exchange adapter registered for venue '{}'",
            config.kind
        )))
    }
}
