//! Per-exchange request rate limiting.
//!
//! A bucket of tokens sized by exchange policy, replenished as dispatched
//! requests age out of the rolling quota window. This keeps the hard
//! guarantee that over any window equal to the exchange's quota window the
//! number of dispatched REST calls never exceeds the configured quota.
//!
//! Every REST call acquires a token; when the bucket is empty the caller
//! blocks until the oldest in-window request expires (dropping the future
//! cancels the wait, so callers can race it against a shutdown signal). An
//! adaptive hint from the server may re-size the bucket at runtime.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Requests per minute for known venues; everything else gets the fallback.
pub fn quota_per_minute(exchange_kind: &str) -> u32 {
    match exchange_kind {
        "binance" => 1200,
        "bybit" => 120,
        "hyperliquid" => 600,
        _ => FALLBACK_QUOTA,
    }
}

const FALLBACK_QUOTA: u32 = 60;
const QUOTA_WINDOW: Duration = Duration::from_secs(60);

/// Wait chunks are capped so a concurrent re-size shortens the block.
const MAX_SLEEP_CHUNK: Duration = Duration::from_millis(250);

#[derive(Debug)]
struct Window {
    /// Dispatch instants still inside the rolling window, oldest first
    dispatched: VecDeque<Instant>,
    max_requests: usize,
}

impl Window {
    fn new(max_requests: u32) -> Self {
        Self {
            dispatched: VecDeque::new(),
            max_requests: max_requests.max(1) as usize,
        }
    }

    fn evict_expired(&mut self, now: Instant) {
        while let Some(&front) = self.dispatched.front() {
            if now.duration_since(front) >= QUOTA_WINDOW {
                self.dispatched.pop_front();
            } else {
                break;
            }
        }
    }

    /// Try to take a slot; on failure return the wait until one frees up.
    fn try_take(&mut self, now: Instant) -> std::result::Result<(), Duration> {
        self.evict_expired(now);
        if self.dispatched.len() < self.max_requests {
            self.dispatched.push_back(now);
            Ok(())
        } else {
            // Oldest request leaving the window frees the next slot
            let oldest = *self.dispatched.front().expect("window is full");
            Err(QUOTA_WINDOW.saturating_sub(now.duration_since(oldest)))
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RateLimiterStats {
    pub acquired: u64,
    pub waited: u64,
    pub resized: u64,
}

/// Rolling-window rate limiter shared by every caller hitting one exchange.
pub struct RateLimiter {
    exchange_kind: String,
    window: Mutex<Window>,
    stats: Mutex<RateLimiterStats>,
}

impl RateLimiter {
    pub fn new(exchange_kind: &str) -> Self {
        let per_minute = quota_per_minute(exchange_kind);
        info!(
            exchange = exchange_kind,
            per_minute, "rate limiter initialized"
        );
        Self::with_quota(exchange_kind, per_minute)
    }

    pub fn with_quota(exchange_kind: &str, per_minute: u32) -> Self {
        Self {
            exchange_kind: exchange_kind.to_string(),
            window: Mutex::new(Window::new(per_minute)),
            stats: Mutex::new(RateLimiterStats::default()),
        }
    }

    pub fn exchange_kind(&self) -> &str {
        &self.exchange_kind
    }

    /// Acquire one dispatch slot, blocking until the window frees one.
    ///
    /// Cancellation-safe: dropping the future while waiting consumes nothing.
    pub async fn acquire(&self) {
        let mut waited = false;
        loop {
            let wait = {
                let mut window = self.window.lock().await;
                match window.try_take(Instant::now()) {
                    Ok(()) => None,
                    Err(wait) => Some(wait),
                }
            };

            match wait {
                None => {
                    let mut stats = self.stats.lock().await;
                    stats.acquired += 1;
                    if waited {
                        stats.waited += 1;
                    }
                    return;
                }
                Some(wait) => {
                    waited = true;
                    debug!(
                        exchange = %self.exchange_kind,
                        wait_ms = wait.as_millis() as u64,
                        "rate limit exhausted, waiting for window slot"
                    );
                    tokio::time::sleep(wait.min(MAX_SLEEP_CHUNK).max(Duration::from_millis(1)))
                        .await;
                }
            }
        }
    }

    /// Accept a server-provided rate hint and re-size the window.
    ///
    /// A hint of zero falls back to the default quota.
    pub async fn apply_hint(&self, per_minute: u32) {
        let per_minute = if per_minute == 0 {
            warn!(
                exchange = %self.exchange_kind,
                "ignoring zero rate hint, using fallback quota"
            );
            FALLBACK_QUOTA
        } else {
            per_minute
        };

        {
            let mut window = self.window.lock().await;
            window.max_requests = per_minute.max(1) as usize;
        }

        let mut stats = self.stats.lock().await;
        stats.resized += 1;
        info!(
            exchange = %self.exchange_kind,
            per_minute, "rate limiter re-sized from server hint"
        );
    }

    pub async fn stats(&self) -> RateLimiterStats {
        self.stats.lock().await.clone()
    }

    /// Free slots currently available (diagnostic hook).
    pub async fn available(&self) -> usize {
        let mut window = self.window.lock().await;
        window.evict_expired(Instant::now());
        window.max_requests.saturating_sub(window.dispatched.len())
    }
}
