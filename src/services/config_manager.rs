//! TTL-cached bot configuration and typed system-config access.
//!
//! The control plane may rewrite a bot row at any time; the worker re-reads
//! it through this cache (default TTL 60s) so changes take effect on the
//! next cycle boundary without hammering the store every cycle.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::adapters::store::Store;
use crate::domain::bot::BotConfig;
use crate::error::{ConclaveError, Result};

pub struct ConfigManager {
    store: Arc<dyn Store>,
    bot_id: i64,
    ttl: Duration,
    cached: Mutex<Option<(Instant, BotConfig)>>,
}

impl ConfigManager {
    pub fn new(store: Arc<dyn Store>, bot_id: i64, ttl: Duration) -> Self {
        Self {
            store,
            bot_id,
            ttl,
            cached: Mutex::new(None),
        }
    }

    /// Current bot config, served from cache within the TTL.
    pub async fn bot_config(&self) -> Result<BotConfig> {
        let mut cached = self.cached.lock().await;
        if let Some((at, config)) = cached.as_ref() {
            if at.elapsed() < self.ttl {
                return Ok(config.clone());
            }
        }

        let config = self
            .store
            .get_bot(self.bot_id)
            .await?
            .ok_or_else(|| {
                ConclaveError::InvalidState(format!("bot not found: id={}", self.bot_id))
            })?;

        let problems = config.validate();
        if !problems.is_empty() {
            // A broken config must not silently replace a working one
            return Err(ConclaveError::InvalidConfig(format!(
                "bot {} config invalid: {}",
                self.bot_id,
                problems.join("; ")
            )));
        }

        debug!(bot_id = self.bot_id, "bot config refreshed from store");
        *cached = Some((Instant::now(), config.clone()));
        Ok(config)
    }

    /// Drop the cached copy so the next read goes to the store.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    /// Typed system-config read. Unknown keys and unparseable values warn
    /// and fall back to the default rather than failing the cycle.
    pub async fn system_value<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        match self.store.get_system_config(key).await {
            Ok(Some(raw)) => match raw.parse::<T>() {
                Ok(value) => value,
                Err(_) => {
                    warn!(key, raw = %raw, "system config value unparseable, using default");
                    default
                }
            },
            Ok(None) => default,
            Err(e) => {
                warn!(key, "system config read failed, using default: {}", e);
                default
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;
    use crate::domain::bot::{QuantWeights, RiskLimits, TradingMode};
    use std::collections::HashMap;

    fn bot(id: i64, interval: u64) -> BotConfig {
        BotConfig {
            id,
            name: format!("bot{}", id),
            display_name: "Bot".into(),
            exchange_id: 1,
            workflow_id: 1,
            llm_id: None,
            trading_mode: TradingMode::Paper,
            cycle_interval_secs: interval,
            max_concurrent_symbols: 3,
            timeframes: vec!["3m".into()],
            ohlcv_limits: HashMap::new(),
            indicator_configs: serde_json::Value::Null,
            quant_weights: QuantWeights::default(),
            quant_threshold: 50.0,
            risk_limits: RiskLimits::default(),
            tracing_project: None,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn test_cache_serves_within_ttl() {
        let store = Arc::new(MemoryStore::new());
        store.seed_bot(bot(1, 300));
        let manager = ConfigManager::new(store.clone(), 1, Duration::from_secs(60));

        let first = manager.bot_config().await.unwrap();
        assert_eq!(first.cycle_interval_secs, 300);

        // A store-side change is invisible until the TTL lapses
        store.update_bot(&bot(1, 120)).await.unwrap();
        let second = manager.bot_config().await.unwrap();
        assert_eq!(second.cycle_interval_secs, 300);

        manager.invalidate().await;
        let third = manager.bot_config().await.unwrap();
        assert_eq!(third.cycle_interval_secs, 120);
    }

    #[tokio::test]
    async fn test_zero_ttl_always_refreshes() {
        let store = Arc::new(MemoryStore::new());
        store.seed_bot(bot(2, 300));
        let manager = ConfigManager::new(store.clone(), 2, Duration::ZERO);

        manager.bot_config().await.unwrap();
        store.update_bot(&bot(2, 45)).await.unwrap();
        assert_eq!(manager.bot_config().await.unwrap().cycle_interval_secs, 45);
    }

    #[tokio::test]
    async fn test_missing_bot_errors() {
        let store = Arc::new(MemoryStore::new());
        let manager = ConfigManager::new(store, 9, Duration::from_secs(60));
        assert!(manager.bot_config().await.is_err());
    }

    #[tokio::test]
    async fn test_system_value_fallbacks() {
        let store = Arc::new(MemoryStore::new());
        store.set_system_config("debate.max_rounds", "4").await.unwrap();
        store.set_system_config("debate.bad", "not-a-number").await.unwrap();
        let manager = ConfigManager::new(store, 1, Duration::from_secs(60));

        assert_eq!(manager.system_value::<u32>("debate.max_rounds", 2).await, 4);
        assert_eq!(manager.system_value::<u32>("debate.bad", 2).await, 2);
        assert_eq!(manager.system_value::<u32>("debate.unset", 7).await, 7);
    }
}
