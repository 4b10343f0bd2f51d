//! Exchange adapter seam, rate limiting and the retrying client wrapper.

pub mod adapter;
pub mod client;
pub mod paper;
pub mod ratelimit;

pub use adapter::{ExchangeAdapter, ExchangeFactory, StreamChannel};
pub use client::RateLimitedClient;
pub use paper::PaperExchange;
pub use ratelimit::{RateLimiter, RateLimiterStats};
