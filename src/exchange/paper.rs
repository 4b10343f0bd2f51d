//! Paper trading: a live adapter composed with a simulated fill layer.
//!
//! Market data passes straight through to the wrapped adapter; orders are
//! filled locally at the live price with the exchange's configured slippage
//! and commission applied, against a simulated balance and position book.

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::BoxStream;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::bot::ExchangeConfig;
use crate::domain::market::{
    AccountBalance, Candle, MarketCatalogue, OrderbookSnapshot, PublicTrade, Ticker,
};
use crate::domain::order::{
    Order, OrderRequest, OrderSide, OrderStatus, Position, PositionSide,
};
use crate::error::{ConclaveError, Result};
use crate::services::fees;

use super::adapter::{ExchangeAdapter, StreamChannel};

/// Default simulated bankroll when the exchange row does not seed one.
const DEFAULT_PAPER_BALANCE: Decimal = dec!(10000);

#[derive(Debug)]
struct SimState {
    balance: AccountBalance,
    positions: HashMap<String, Position>,
}

/// Simulated fill layer over a live adapter.
pub struct PaperExchange {
    inner: Arc<dyn ExchangeAdapter>,
    exchange_config: ExchangeConfig,
    state: Mutex<SimState>,
}

impl PaperExchange {
    pub fn new(inner: Arc<dyn ExchangeAdapter>, exchange_config: ExchangeConfig) -> Self {
        Self::with_balance(inner, exchange_config, DEFAULT_PAPER_BALANCE)
    }

    pub fn with_balance(
        inner: Arc<dyn ExchangeAdapter>,
        exchange_config: ExchangeConfig,
        initial_balance: Decimal,
    ) -> Self {
        info!(
            exchange = %exchange_config.kind,
            balance = %initial_balance,
            "paper fill layer initialized"
        );
        Self {
            inner,
            exchange_config,
            state: Mutex::new(SimState {
                balance: AccountBalance {
                    currency: "USDT".to_string(),
                    free: initial_balance,
                    used: Decimal::ZERO,
                    total: initial_balance,
                    timestamp: Utc::now(),
                },
                positions: HashMap::new(),
            }),
        }
    }

    async fn reference_price(&self, request: &OrderRequest) -> Result<Decimal> {
        if let Some(price) = request.price {
            return Ok(price);
        }
        let ticker = self.inner.fetch_ticker(&request.symbol).await?;
        Ok(ticker.last)
    }

    fn open_position(
        state: &mut SimState,
        request: &OrderRequest,
        fill: &fees::SimulatedFill,
    ) -> Result<()> {
        let side = match request.side {
            OrderSide::Buy => PositionSide::Long,
            OrderSide::Sell => PositionSide::Short,
        };
        let leverage = request.leverage.max(1);
        let margin = (fill.notional / Decimal::from(leverage)).round_dp(8);
        let required = margin + fill.fee;

        if state.balance.free < required {
            return Err(ConclaveError::InsufficientFunds(format!(
                "need {} {} (margin {} + fee {}), free {}",
                required,
                state.balance.currency,
                margin,
                fill.fee,
                state.balance.free
            )));
        }

        if state.positions.contains_key(&request.symbol) {
            return Err(ConclaveError::OrderSubmission(format!(
                "{}: position already open",
                request.symbol
            )));
        }

        state.balance.free -= required;
        state.balance.used += margin;
        state.balance.total -= fill.fee;
        state.balance.timestamp = Utc::now();

        state.positions.insert(
            request.symbol.clone(),
            Position {
                symbol: request.symbol.clone(),
                side,
                size: request.amount,
                entry_price: fill.price,
                mark_price: fill.price,
                leverage,
                margin_used: margin,
                unrealized_pnl: Decimal::ZERO,
                liquidation_price: None,
            },
        );
        Ok(())
    }

    fn close_position(
        state: &mut SimState,
        request: &OrderRequest,
        fill: &fees::SimulatedFill,
    ) -> Result<Decimal> {
        let position = state.positions.remove(&request.symbol).ok_or_else(|| {
            ConclaveError::OrderSubmission(format!("{}: no position to close", request.symbol))
        })?;

        let pnl = match position.side {
            PositionSide::Long => (fill.price - position.entry_price) * position.size,
            PositionSide::Short => (position.entry_price - fill.price) * position.size,
        };

        state.balance.used -= position.margin_used;
        state.balance.free += position.margin_used + pnl - fill.fee;
        state.balance.total += pnl - fill.fee;
        state.balance.timestamp = Utc::now();
        Ok(pnl)
    }
}

#[async_trait]
impl ExchangeAdapter for PaperExchange {
    fn kind(&self) -> &str {
        self.inner.kind()
    }

    fn is_testnet(&self) -> bool {
        self.inner.is_testnet()
    }

    async fn load_markets(&self) -> Result<MarketCatalogue> {
        self.inner.load_markets().await
    }

    async fn fetch_ohlcv(&self, symbol: &str, timeframe: &str, limit: u32) -> Result<Vec<Candle>> {
        self.inner.fetch_ohlcv(symbol, timeframe, limit).await
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker> {
        self.inner.fetch_ticker(symbol).await
    }

    async fn fetch_orderbook(&self, symbol: &str, depth: u32) -> Result<OrderbookSnapshot> {
        self.inner.fetch_orderbook(symbol, depth).await
    }

    async fn fetch_open_interest(&self, symbol: &str) -> Result<Decimal> {
        self.inner.fetch_open_interest(symbol).await
    }

    async fn fetch_funding_rate(&self, symbol: &str) -> Result<Decimal> {
        self.inner.fetch_funding_rate(symbol).await
    }

    async fn fetch_balance(&self) -> Result<AccountBalance> {
        Ok(self.state.lock().await.balance.clone())
    }

    async fn fetch_positions(&self) -> Result<Vec<Position>> {
        // Refresh marks from the live feed so unrealized PnL stays honest
        let mut state = self.state.lock().await;
        let symbols: Vec<String> = state.positions.keys().cloned().collect();
        for symbol in symbols {
            match self.inner.fetch_ticker(&symbol).await {
                Ok(ticker) => {
                    if let Some(pos) = state.positions.get_mut(&symbol) {
                        pos.mark_price = ticker.last;
                        pos.unrealized_pnl = match pos.side {
                            PositionSide::Long => (pos.mark_price - pos.entry_price) * pos.size,
                            PositionSide::Short => (pos.entry_price - pos.mark_price) * pos.size,
                        };
                    }
                }
                Err(e) => {
                    warn!(symbol = %symbol, "mark refresh failed, keeping stale mark: {}", e);
                }
            }
        }
        Ok(state.positions.values().cloned().collect())
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<Order> {
        let reference = self.reference_price(request).await?;
        let fill = fees::simulate_fill(
            &self.exchange_config,
            reference,
            request.amount,
            request.side,
        );

        let mut state = self.state.lock().await;
        let closing =
            request.reduce_only || {
                // A sell against a long (or buy against a short) reduces
                match state.positions.get(&request.symbol) {
                    Some(p) => p.side.entry_order_side() != request.side,
                    None => false,
                }
            };

        if closing {
            Self::close_position(&mut state, request, &fill)?;
        } else {
            Self::open_position(&mut state, request, &fill)?;
        }

        Ok(Order {
            id: format!("paper-{}", Uuid::new_v4()),
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            status: OrderStatus::Closed,
            amount: request.amount,
            filled: request.amount,
            average_price: Some(fill.price),
            fee: Some(fill.fee),
            timestamp: Utc::now(),
        })
    }

    async fn cancel_order(&self, _order_id: &str, _symbol: &str) -> Result<()> {
        // Market fills complete instantly in the simulation
        Ok(())
    }

    async fn watch_ticker(&self, symbol: &str) -> Result<BoxStream<'static, Result<Ticker>>> {
        self.inner.watch_ticker(symbol).await
    }

    async fn watch_trades(&self, symbol: &str) -> Result<BoxStream<'static, Result<PublicTrade>>> {
        self.inner.watch_trades(symbol).await
    }

    async fn unwatch(&self, symbol: &str, channel: StreamChannel) -> Result<()> {
        self.inner.unwatch(symbol, channel).await
    }
}
