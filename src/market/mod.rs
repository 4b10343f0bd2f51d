//! Market ingestion: TTL cache, REST poll provider, WebSocket streams.

pub mod cache;
pub mod poll;
pub mod stream;

pub use cache::{CacheStats, MarketCache};
pub use poll::MarketDataService;
pub use stream::{StreamManager, StreamStats, SubscriptionState};
