//! Dynamic WebSocket subscription manager.
//!
//! Tracks one subscription per `(symbol, channel)` through the state machine
//! `pending -> active -> failed -> retry_scheduled -> active | dead`. Each
//! cycle the worker hands in the desired symbol set and `reconcile` computes
//! the delta: new symbols plus previously-failed ones are (re)subscribed,
//! symbols that left the set are torn down and their lock objects
//! garbage-collected. Stream payloads land in the shared cache.

use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::exchange::adapter::{ExchangeAdapter, StreamChannel};

use super::cache::MarketCache;

const MAX_STREAM_RETRIES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Pending,
    Active,
    Failed,
    RetryScheduled,
    Dead,
}

impl SubscriptionState {
    /// Valid next states from the current one.
    pub fn valid_transitions(self) -> &'static [SubscriptionState] {
        use SubscriptionState::*;
        match self {
            Pending => &[Active, Failed],
            Active => &[Failed, RetryScheduled, Dead],
            Failed => &[RetryScheduled, Pending, Dead],
            RetryScheduled => &[Active, Failed, Dead],
            Dead => &[],
        }
    }

    pub fn can_transition_to(self, next: SubscriptionState) -> bool {
        self.valid_transitions().contains(&next)
    }

    pub fn is_failed(self) -> bool {
        matches!(
            self,
            SubscriptionState::Failed | SubscriptionState::RetryScheduled
        )
    }
}

pub type SubKey = (String, StreamChannel);

struct SubEntry {
    state: SubscriptionState,
    /// Guards connect/disconnect transitions; never held across stream waits
    guard: Arc<Mutex<()>>,
    task: Option<JoinHandle<()>>,
}

impl SubEntry {
    fn new() -> Self {
        Self {
            state: SubscriptionState::Pending,
            guard: Arc::new(Mutex::new(())),
            task: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StreamStats {
    pub active: usize,
    /// Subscriptions currently waiting for the next reconcile retry
    pub failed_retries: usize,
    pub last_reconcile_at: Option<DateTime<Utc>>,
    pub total_subscribed: u64,
    pub total_unsubscribed: u64,
    pub reconnections: u64,
}

/// Stream provider maintaining persistent subscriptions for the active
/// symbol set.
pub struct StreamManager {
    adapter: Arc<dyn ExchangeAdapter>,
    cache: Arc<MarketCache>,
    /// Table-level lock is held only for add/remove/state flips
    table: Arc<Mutex<HashMap<SubKey, SubEntry>>>,
    counters: Arc<Mutex<StreamStats>>,
}

impl StreamManager {
    pub fn new(adapter: Arc<dyn ExchangeAdapter>, cache: Arc<MarketCache>) -> Self {
        Self {
            adapter,
            cache,
            table: Arc::new(Mutex::new(HashMap::new())),
            counters: Arc::new(Mutex::new(StreamStats::default())),
        }
    }

    /// Reconcile the subscription table against the desired symbol set.
    ///
    /// Idempotent: running it twice with the same inputs changes nothing.
    pub async fn reconcile(
        &self,
        desired_symbols: &[String],
        channels: &[StreamChannel],
    ) -> StreamStats {
        let desired: HashSet<SubKey> = desired_symbols
            .iter()
            .flat_map(|s| channels.iter().map(move |c| (s.clone(), *c)))
            .collect();

        let (current, failed): (HashSet<SubKey>, HashSet<SubKey>) = {
            let table = self.table.lock().await;
            let mut current = HashSet::new();
            let mut failed = HashSet::new();
            for (key, entry) in table.iter() {
                match entry.state {
                    SubscriptionState::Active | SubscriptionState::Pending => {
                        current.insert(key.clone());
                    }
                    s if s.is_failed() => {
                        failed.insert(key.clone());
                    }
                    _ => {}
                }
            }
            (current, failed)
        };

        // New symbols plus previously-failed ones still in the desired set
        let to_subscribe: HashSet<SubKey> = desired
            .iter()
            .filter(|k| !current.contains(*k) || failed.contains(*k))
            .cloned()
            .collect();
        let to_unsubscribe: Vec<SubKey> = current.difference(&desired).cloned().collect();
        // Failed entries that left the desired set are dead; drop them so
        // their lock objects do not accumulate
        let to_gc: Vec<SubKey> = failed.difference(&desired).cloned().collect();

        debug!(
            subscribe = to_subscribe.len(),
            unsubscribe = to_unsubscribe.len(),
            gc = to_gc.len(),
            "subscription reconcile"
        );

        for key in &to_unsubscribe {
            self.unsubscribe(key).await;
        }

        for key in &to_gc {
            let mut table = self.table.lock().await;
            if table.get(key).map(|e| e.state.is_failed()).unwrap_or(false) {
                table.remove(key);
                debug!(symbol = %key.0, channel = %key.1, "dropped dead subscription");
            }
        }

        for key in &to_subscribe {
            if let Err(e) = self.subscribe(key).await {
                warn!(symbol = %key.0, channel = %key.1, "subscribe failed: {}", e);
            }
        }

        {
            let mut counters = self.counters.lock().await;
            counters.last_reconcile_at = Some(Utc::now());
        }
        let stats = self.stats().await;
        info!(
            active = stats.active,
            failed = stats.failed_retries,
            "streams reconciled"
        );
        stats
    }

    /// Attempt to open one subscription under its per-entry guard.
    async fn subscribe(&self, key: &SubKey) -> Result<()> {
        let guard = {
            let mut table = self.table.lock().await;
            let entry = table.entry(key.clone()).or_insert_with(SubEntry::new);
            if entry.state == SubscriptionState::Active {
                return Ok(()); // already live; exactly one subscription per key
            }
            entry.state = SubscriptionState::Pending;
            entry.guard.clone()
        };

        // Connect transition happens under the entry lock; the lock is
        // released before any stream waits
        let _g = guard.lock().await;

        // First connect happens inline so reconcile learns about failures
        // synchronously; later reconnects live inside the consumer task
        match open_stream(&self.adapter, &self.cache, &key.0, key.1).await {
            Ok(stream) => {
                let task = self.spawn_consumer(key.clone(), stream);
                let mut table = self.table.lock().await;
                if let Some(entry) = table.get_mut(key) {
                    entry.state = SubscriptionState::Active;
                    entry.task = Some(task);
                }
                self.counters.lock().await.total_subscribed += 1;
                info!(symbol = %key.0, channel = %key.1, "subscribed");
                Ok(())
            }
            Err(e) => {
                let mut table = self.table.lock().await;
                if let Some(entry) = table.get_mut(key) {
                    entry.state = SubscriptionState::Failed;
                }
                Err(e)
            }
        }
    }

    fn spawn_consumer(
        &self,
        key: SubKey,
        stream: BoxStream<'static, Result<()>>,
    ) -> JoinHandle<()> {
        let adapter = self.adapter.clone();
        let cache = self.cache.clone();
        let table = self.table.clone();
        let counters = self.counters.clone();

        tokio::spawn(async move {
            let mut stream = stream;
            let mut retries = 0u32;
            loop {
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(()) => retries = 0,
                        Err(e) => {
                            warn!(symbol = %key.0, channel = %key.1, "stream error: {}", e);
                            break;
                        }
                    }
                }

                retries += 1;
                if retries >= MAX_STREAM_RETRIES {
                    error!(
                        symbol = %key.0,
                        channel = %key.1,
                        "stream retries exhausted, marking failed for next reconcile"
                    );
                    let mut table = table.lock().await;
                    if let Some(entry) = table.get_mut(&key) {
                        entry.state = SubscriptionState::Failed;
                        entry.task = None;
                    }
                    return;
                }

                {
                    let mut table = table.lock().await;
                    if let Some(entry) = table.get_mut(&key) {
                        entry.state = SubscriptionState::RetryScheduled;
                    }
                }

                let backoff = Duration::from_secs(2u64.saturating_pow(retries).min(60));
                debug!(
                    symbol = %key.0,
                    retry = retries,
                    backoff_secs = backoff.as_secs(),
                    "stream reconnecting"
                );
                tokio::time::sleep(backoff).await;

                match open_stream(&adapter, &cache, &key.0, key.1).await {
                    Ok(s) => {
                        stream = s;
                        let mut table = table.lock().await;
                        if let Some(entry) = table.get_mut(&key) {
                            entry.state = SubscriptionState::Active;
                        }
                        counters.lock().await.reconnections += 1;
                        info!(symbol = %key.0, channel = %key.1, "stream reconnected");
                    }
                    Err(e) => {
                        warn!(symbol = %key.0, "reconnect failed: {}", e);
                    }
                }
            }
        })
    }

    /// Tear down one subscription: cancel the stream, release the entry and
    /// its lock object.
    async fn unsubscribe(&self, key: &SubKey) {
        let entry = {
            let mut table = self.table.lock().await;
            table.remove(key)
        };

        let Some(mut entry) = entry else { return };
        let _g = entry.guard.lock().await;

        if let Err(e) = self.adapter.unwatch(&key.0, key.1).await {
            debug!(symbol = %key.0, "unwatch not supported or failed: {}", e);
        }
        if let Some(task) = entry.task.take() {
            task.abort();
        }

        self.counters.lock().await.total_unsubscribed += 1;
        info!(symbol = %key.0, channel = %key.1, "unsubscribed");
    }

    /// Tear down everything (worker shutdown).
    pub async fn shutdown(&self) {
        let keys: Vec<SubKey> = {
            let table = self.table.lock().await;
            table.keys().cloned().collect()
        };
        for key in &keys {
            self.unsubscribe(key).await;
        }
        info!(count = keys.len(), "all streams shut down");
    }

    pub async fn stats(&self) -> StreamStats {
        let table = self.table.lock().await;
        let mut stats = self.counters.lock().await.clone();
        stats.active = table
            .values()
            .filter(|e| e.state == SubscriptionState::Active)
            .count();
        stats.failed_retries = table.values().filter(|e| e.state.is_failed()).count();
        stats
    }

    /// Current state of one subscription (diagnostic hook).
    pub async fn state_of(
        &self,
        symbol: &str,
        channel: StreamChannel,
    ) -> Option<SubscriptionState> {
        let table = self.table.lock().await;
        table.get(&(symbol.to_string(), channel)).map(|e| e.state)
    }
}

/// Open the channel stream, mapping each payload into a cache write.
async fn open_stream(
    adapter: &Arc<dyn ExchangeAdapter>,
    cache: &Arc<MarketCache>,
    symbol: &str,
    channel: StreamChannel,
) -> Result<BoxStream<'static, Result<()>>> {
    match channel {
        StreamChannel::Ticker => {
            let stream = adapter.watch_ticker(symbol).await?;
            let cache = cache.clone();
            Ok(stream
                .map(move |item| {
                    item.map(|ticker| {
                        cache.set_as("tickers", &ticker.symbol, &ticker);
                    })
                })
                .boxed())
        }
        StreamChannel::Trades => {
            let stream = adapter.watch_trades(symbol).await?;
            let cache = cache.clone();
            Ok(stream
                .map(move |item| {
                    item.map(|trade| {
                        cache.set_as("trades", &trade.symbol, &trade);
                    })
                })
                .boxed())
        }
    }
}
