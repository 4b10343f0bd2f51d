//! Rate-limited, retrying exchange client.
//!
//! Wraps an [`ExchangeAdapter`] so that every REST call acquires a token
//! from the shared per-exchange limiter, respects the in-flight connection
//! cap, and retries transient failures with exponential backoff and jitter.
//! Authentication and invalid-request responses give up immediately.

use rand::Rng;
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::domain::market::{
    AccountBalance, Candle, MarketCatalogue, OrderbookSnapshot, Ticker,
};
use crate::domain::order::{Order, OrderRequest, Position};
use crate::error::{ConclaveError, Result};

use super::adapter::ExchangeAdapter;
use super::ratelimit::RateLimiter;

/// Retry policy for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff with uniform jitter in [0.5x, 1.5x].
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            .min(self.max_delay);
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        exp.mul_f64(jitter)
    }
}

/// The shared exchange client handed to pipeline nodes through the context.
pub struct RateLimitedClient {
    inner: Arc<dyn ExchangeAdapter>,
    limiter: Arc<RateLimiter>,
    inflight: Arc<Semaphore>,
    retry: RetryPolicy,
}

impl RateLimitedClient {
    pub fn new(
        inner: Arc<dyn ExchangeAdapter>,
        limiter: Arc<RateLimiter>,
        max_concurrent_requests: usize,
    ) -> Self {
        Self {
            inner,
            limiter,
            inflight: Arc::new(Semaphore::new(max_concurrent_requests.max(1))),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn adapter(&self) -> &Arc<dyn ExchangeAdapter> {
        &self.inner
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn exchange_kind(&self) -> &str {
        self.inner.kind()
    }

    /// Run one adapter call under the limiter, connection cap and retry
    /// policy. The closure is re-invoked on each retry.
    async fn execute<T, F, Fut>(&self, op: &'static str, call: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;

            self.limiter.acquire().await;
            let _permit = self
                .inflight
                .acquire()
                .await
                .map_err(|_| ConclaveError::Cancelled)?;

            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        op,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transient exchange error, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if attempt >= self.retry.max_attempts && e.is_retryable() {
                        warn!(op, attempt, "retries exhausted: {}", e);
                    } else {
                        debug!(op, "non-retryable exchange error: {}", e);
                    }
                    return Err(e);
                }
            }
        }
    }

    pub async fn load_markets(&self) -> Result<MarketCatalogue> {
        self.execute("load_markets", || self.inner.load_markets())
            .await
    }

    pub async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: u32,
    ) -> Result<Vec<Candle>> {
        self.execute("fetch_ohlcv", || {
            self.inner.fetch_ohlcv(symbol, timeframe, limit)
        })
        .await
    }

    pub async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker> {
        self.execute("fetch_ticker", || self.inner.fetch_ticker(symbol))
            .await
    }

    pub async fn fetch_orderbook(&self, symbol: &str, depth: u32) -> Result<OrderbookSnapshot> {
        self.execute("fetch_orderbook", || {
            self.inner.fetch_orderbook(symbol, depth)
        })
        .await
    }

    pub async fn fetch_open_interest(&self, symbol: &str) -> Result<Decimal> {
        self.execute("fetch_open_interest", || {
            self.inner.fetch_open_interest(symbol)
        })
        .await
    }

    pub async fn fetch_funding_rate(&self, symbol: &str) -> Result<Decimal> {
        self.execute("fetch_funding_rate", || {
            self.inner.fetch_funding_rate(symbol)
        })
        .await
    }

    pub async fn fetch_balance(&self) -> Result<AccountBalance> {
        self.execute("fetch_balance", || self.inner.fetch_balance())
            .await
    }

    pub async fn fetch_positions(&self) -> Result<Vec<Position>> {
        self.execute("fetch_positions", || self.inner.fetch_positions())
            .await
    }

    /// Orders are never retried: `create_order` is not idempotent at the
    /// venue, so a lost response must surface instead of double-sending.
    pub async fn create_order(&self, request: &OrderRequest) -> Result<Order> {
        self.limiter.acquire().await;
        let _permit = self
            .inflight
            .acquire()
            .await
            .map_err(|_| ConclaveError::Cancelled)?;
        self.inner.create_order(request).await
    }

    pub async fn cancel_order(&self, order_id: &str, symbol: &str) -> Result<()> {
        self.execute("cancel_order", || self.inner.cancel_order(order_id, symbol))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use futures_util::stream::BoxStream;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::domain::market::PublicTrade;
    use crate::exchange::adapter::StreamChannel;

    /// Adapter that fails a configured number of times before succeeding.
    struct FlakyAdapter {
        failures: AtomicU32,
        error: fn() -> ConclaveError,
    }

    impl FlakyAdapter {
        fn new(failures: u32, error: fn() -> ConclaveError) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                error,
            }
        }
    }

    #[async_trait]
    impl ExchangeAdapter for FlakyAdapter {
        fn kind(&self) -> &str {
            "test"
        }

        fn is_testnet(&self) -> bool {
            true
        }

        async fn load_markets(&self) -> Result<MarketCatalogue> {
            Ok(MarketCatalogue::default())
        }

        async fn fetch_ohlcv(&self, _: &str, _: &str, _: u32) -> Result<Vec<Candle>> {
            Ok(Vec::new())
        }

        async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker> {
            if self.failures.fetch_sub(1, Ordering::SeqCst) > 0 {
                return Err((self.error)());
            }
            Ok(Ticker {
                symbol: symbol.to_string(),
                last: dec!(100),
                bid: None,
                ask: None,
                timestamp: Utc::now(),
            })
        }

        async fn fetch_orderbook(&self, _: &str, _: u32) -> Result<OrderbookSnapshot> {
            unimplemented!()
        }

        async fn fetch_open_interest(&self, _: &str) -> Result<Decimal> {
            unimplemented!()
        }

        async fn fetch_funding_rate(&self, _: &str) -> Result<Decimal> {
            unimplemented!()
        }

        async fn fetch_balance(&self) -> Result<AccountBalance> {
            unimplemented!()
        }

        async fn fetch_positions(&self) -> Result<Vec<Position>> {
            Ok(Vec::new())
        }

        async fn create_order(&self, _: &OrderRequest) -> Result<Order> {
            unimplemented!()
        }

        async fn cancel_order(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }

        async fn watch_ticker(&self, _: &str) -> Result<BoxStream<'static, Result<Ticker>>> {
            unimplemented!()
        }

        async fn watch_trades(&self, _: &str) -> Result<BoxStream<'static, Result<PublicTrade>>> {
            unimplemented!()
        }

        async fn unwatch(&self, _: &str, _: StreamChannel) -> Result<()> {
            Ok(())
        }
    }

    fn client(adapter: FlakyAdapter) -> RateLimitedClient {
        RateLimitedClient::new(
            Arc::new(adapter),
            Arc::new(RateLimiter::with_quota("test", 600)),
            10,
        )
        .with_retry(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        })
    }

    #[tokio::test]
    async fn test_transient_error_is_retried() {
        let c = client(FlakyAdapter::new(2, || {
            ConclaveError::Stream("connection reset".into())
        }));
        let ticker = c.fetch_ticker("BTC/USDT").await.unwrap();
        assert_eq!(ticker.symbol, "BTC/USDT");
    }

    #[tokio::test]
    async fn test_auth_error_gives_up_immediately() {
        let c = client(FlakyAdapter::new(10, || {
            ConclaveError::Auth("key revoked".into())
        }));
        let err = c.fetch_ticker("BTC/USDT").await.unwrap_err();
        assert!(matches!(err, ConclaveError::Auth(_)));
        // Only one attempt was consumed
        let remaining = match c.inner.fetch_ticker("BTC/USDT").await {
            Err(_) => true,
            Ok(_) => false,
        };
        assert!(remaining, "second call should still hit a failure");
    }

    #[tokio::test]
    async fn test_retries_exhausted_surface_last_error() {
        let c = client(FlakyAdapter::new(10, || {
            ConclaveError::RateLimited("busy".into())
        }));
        let err = c.fetch_ticker("BTC/USDT").await.unwrap_err();
        assert!(matches!(err, ConclaveError::RateLimited(_)));
    }
}
