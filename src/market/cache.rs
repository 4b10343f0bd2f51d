//! Namespaced TTL cache absorbing bursty pipeline demand.
//!
//! Keys are `(namespace, key)`; the namespace selects the TTL (tickers 10s,
//! ohlcv_3m 5m, markets 1h, ...). Reads never return an expired entry
//! (sweep-on-read); the periodic sweep walks an expiry-ordered heap per
//! namespace so it finishes in O(shards) when nothing is expired.
//!
//! The `backtest_ohlcv` namespace is immutable after first write.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::CacheConfig;

const IMMUTABLE_NAMESPACES: &[&str] = &["backtest_ohlcv"];

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Instant,
    generation: u64,
}

#[derive(Debug, Default)]
struct Shard {
    entries: RwLock<HashMap<String, Entry>>,
    /// (expiry, generation, key), soonest first. Stale generations are
    /// skipped during the sweep.
    expiry: Mutex<BinaryHeap<Reverse<(Instant, u64, String)>>>,
}

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub total_entries: usize,
    pub by_namespace: HashMap<String, usize>,
}

/// Shared market data cache, sharded by namespace.
pub struct MarketCache {
    ttls: HashMap<String, u64>,
    fallback_ttl: Duration,
    shards: RwLock<HashMap<String, Arc<Shard>>>,
    generation: AtomicU64,
}

impl MarketCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            ttls: config.ttl_secs.clone(),
            fallback_ttl: Duration::from_secs(config.fallback_ttl_secs),
            shards: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(&CacheConfig::default())
    }

    pub fn ttl_for(&self, namespace: &str) -> Duration {
        self.ttls
            .get(namespace)
            .map(|s| Duration::from_secs(*s))
            .unwrap_or(self.fallback_ttl)
    }

    fn shard(&self, namespace: &str) -> Arc<Shard> {
        if let Some(shard) = self.shards.read().unwrap().get(namespace) {
            return shard.clone();
        }
        let mut shards = self.shards.write().unwrap();
        shards
            .entry(namespace.to_string())
            .or_insert_with(|| Arc::new(Shard::default()))
            .clone()
    }

    /// Read a value. Expired entries are removed on access and never
    /// returned.
    pub fn get(&self, namespace: &str, key: &str) -> Option<Value> {
        let shard = self.shard(namespace);
        let now = Instant::now();

        {
            let entries = shard.entries.read().unwrap();
            match entries.get(key) {
                Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
                Some(_) => {} // expired, fall through to remove
                None => return None,
            }
        }

        let mut entries = shard.entries.write().unwrap();
        if let Some(entry) = entries.get(key) {
            if entry.expires_at <= now {
                entries.remove(key);
                debug!(namespace, key, "cache entry expired on read");
            } else {
                return Some(entry.value.clone());
            }
        }
        None
    }

    pub fn get_as<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Option<T> {
        let value = self.get(namespace, key)?;
        serde_json::from_value(value).ok()
    }

    /// Store a value under the namespace TTL.
    pub fn set(&self, namespace: &str, key: &str, value: Value) {
        self.set_with_ttl(namespace, key, value, self.ttl_for(namespace))
    }

    pub fn set_with_ttl(&self, namespace: &str, key: &str, value: Value, ttl: Duration) {
        let shard = self.shard(namespace);
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let expires_at = Instant::now() + ttl;

        {
            let mut entries = shard.entries.write().unwrap();
            if IMMUTABLE_NAMESPACES.contains(&namespace) && entries.contains_key(key) {
                warn!(namespace, key, "namespace is immutable after write, ignoring set");
                return;
            }
            entries.insert(
                key.to_string(),
                Entry {
                    value,
                    expires_at,
                    generation,
                },
            );
        }

        shard
            .expiry
            .lock()
            .unwrap()
            .push(Reverse((expires_at, generation, key.to_string())));
    }

    pub fn set_as<T: Serialize>(&self, namespace: &str, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(v) => self.set(namespace, key, v),
            Err(e) => warn!(namespace, key, "failed to serialize cache value: {}", e),
        }
    }

    pub fn delete(&self, namespace: &str, key: &str) -> bool {
        let shard = self.shard(namespace);
        let removed = shard.entries.write().unwrap().remove(key).is_some();
        removed
    }

    pub fn clear_namespace(&self, namespace: &str) -> usize {
        let shard = self.shard(namespace);
        let mut entries = shard.entries.write().unwrap();
        let count = entries.len();
        entries.clear();
        shard.expiry.lock().unwrap().clear();
        count
    }

    /// Remove expired entries. Cost is bounded by the number of expired heap
    /// records; when nothing is expired each shard does a single peek.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let shards: Vec<Arc<Shard>> = self.shards.read().unwrap().values().cloned().collect();
        let mut removed = 0;

        for shard in shards {
            let mut heap = shard.expiry.lock().unwrap();
            loop {
                match heap.peek() {
                    Some(Reverse((expires_at, _, _))) if *expires_at <= now => {}
                    _ => break,
                }
                let Reverse((_, generation, key)) = heap.pop().unwrap();

                let mut entries = shard.entries.write().unwrap();
                if let Some(entry) = entries.get(&key) {
                    // A newer write supersedes this heap record
                    if entry.generation == generation && entry.expires_at <= now {
                        entries.remove(&key);
                        removed += 1;
                    }
                }
            }
        }

        if removed > 0 {
            debug!(removed, "cache sweep removed expired entries");
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let shards = self.shards.read().unwrap();
        let mut by_namespace = HashMap::new();
        let mut total = 0;
        for (namespace, shard) in shards.iter() {
            let count = shard.entries.read().unwrap().len();
            total += count;
            by_namespace.insert(namespace.clone(), count);
        }
        CacheStats {
            total_entries: total,
            by_namespace,
        }
    }
}
