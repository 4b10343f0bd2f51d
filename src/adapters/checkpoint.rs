//! Checkpoint store: durable CycleState snapshots at node boundaries.
//!
//! Keyed by `(thread_id, cycle_id, node_name)`. Rewinding to any key yields
//! exactly the state the next node would have seen, which enables both crash
//! recovery and time-travel analysis. Writes are transactional and
//! idempotent; a checkpoint once written is immutable — a retry must not
//! change the stored bytes.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::{debug, instrument};

use crate::domain::state::CycleState;
use crate::error::{ConclaveError, Result};

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist the state after a node completed. Idempotent: replaying the
    /// same key leaves the first write untouched.
    async fn put(
        &self,
        thread_id: &str,
        cycle_id: i64,
        node_name: &str,
        state: &CycleState,
    ) -> Result<()>;

    async fn get(
        &self,
        thread_id: &str,
        cycle_id: i64,
        node_name: &str,
    ) -> Result<Option<CycleState>>;

    /// Highest cycle id checkpointed for a thread, for counter continuity
    /// across restarts.
    async fn latest_cycle(&self, thread_id: &str) -> Result<Option<i64>>;

    /// Node names checkpointed for one cycle, in write order.
    async fn nodes_for_cycle(&self, thread_id: &str, cycle_id: i64) -> Result<Vec<String>>;
}

/// Postgres-backed checkpoint store.
#[derive(Clone)]
pub struct PostgresCheckpointStore {
    pool: PgPool,
}

impl PostgresCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointStore for PostgresCheckpointStore {
    #[instrument(skip(self, state))]
    async fn put(
        &self,
        thread_id: &str,
        cycle_id: i64,
        node_name: &str,
        state: &CycleState,
    ) -> Result<()> {
        let payload = serde_json::to_string(state)?;
        // DO NOTHING keeps the first write: immutability survives retries
        sqlx::query(
            r#"
            INSERT INTO checkpoints (thread_id, cycle_id, node_name, state, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (thread_id, cycle_id, node_name) DO NOTHING
            "#,
        )
        .bind(thread_id)
        .bind(cycle_id)
        .bind(node_name)
        .bind(payload)
        .execute(&self.pool)
        .await?;

        debug!(thread_id, cycle_id, node_name, "checkpoint written");
        Ok(())
    }

    async fn get(
        &self,
        thread_id: &str,
        cycle_id: i64,
        node_name: &str,
    ) -> Result<Option<CycleState>> {
        let row = sqlx::query(
            r#"
            SELECT state FROM checkpoints
            WHERE thread_id = $1 AND cycle_id = $2 AND node_name = $3
            "#,
        )
        .bind(thread_id)
        .bind(cycle_id)
        .bind(node_name)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let raw: String = row.get("state");
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    async fn latest_cycle(&self, thread_id: &str) -> Result<Option<i64>> {
        let row = sqlx::query(
            "SELECT MAX(cycle_id) AS latest FROM checkpoints WHERE thread_id = $1",
        )
        .bind(thread_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<Option<i64>, _>("latest"))
    }

    async fn nodes_for_cycle(&self, thread_id: &str, cycle_id: i64) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT node_name FROM checkpoints
            WHERE thread_id = $1 AND cycle_id = $2
            ORDER BY created_at ASC
            "#,
        )
        .bind(thread_id)
        .bind(cycle_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|r| r.get("node_name")).collect())
    }
}

type CheckpointKey = (String, i64, String);

/// In-memory checkpoint store for tests and store-less development runs.
///
/// Stores serialized bytes so immutability means byte-identical re-reads.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    entries: Mutex<BTreeMap<CheckpointKey, Vec<u8>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw stored bytes (test hook for the immutability property).
    pub fn raw(&self, thread_id: &str, cycle_id: i64, node_name: &str) -> Option<Vec<u8>> {
        self.entries
            .lock()
            .unwrap()
            .get(&(thread_id.to_string(), cycle_id, node_name.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn put(
        &self,
        thread_id: &str,
        cycle_id: i64,
        node_name: &str,
        state: &CycleState,
    ) -> Result<()> {
        let payload = serde_json::to_vec(state)?;
        let mut entries = self.entries.lock().unwrap();
        entries
            .entry((thread_id.to_string(), cycle_id, node_name.to_string()))
            .or_insert(payload);
        Ok(())
    }

    async fn get(
        &self,
        thread_id: &str,
        cycle_id: i64,
        node_name: &str,
    ) -> Result<Option<CycleState>> {
        let entries = self.entries.lock().unwrap();
        match entries.get(&(thread_id.to_string(), cycle_id, node_name.to_string())) {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(bytes).map_err(ConclaveError::from)?,
            )),
            None => Ok(None),
        }
    }

    async fn latest_cycle(&self, thread_id: &str) -> Result<Option<i64>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .keys()
            .filter(|(t, _, _)| t == thread_id)
            .map(|(_, c, _)| *c)
            .max())
    }

    async fn nodes_for_cycle(&self, thread_id: &str, cycle_id: i64) -> Result<Vec<String>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .keys()
            .filter(|(t, c, _)| t == thread_id && *c == cycle_id)
            .map(|(_, _, n)| n.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::bot::{BotConfig, QuantWeights, RiskLimits, TradingMode};
    use crate::domain::market::AccountBalance;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn sample_state(cycle_id: i64) -> CycleState {
        let config = BotConfig {
            id: 1,
            name: "bot".into(),
            display_name: "Bot".into(),
            exchange_id: 1,
            workflow_id: 1,
            llm_id: None,
            trading_mode: TradingMode::Paper,
            cycle_interval_secs: 60,
            max_concurrent_symbols: 3,
            timeframes: vec!["3m".into()],
            ohlcv_limits: HashMap::new(),
            indicator_configs: serde_json::Value::Null,
            quant_weights: QuantWeights::default(),
            quant_threshold: 50.0,
            risk_limits: RiskLimits::default(),
            tracing_project: None,
            is_active: true,
        };
        let mut state = CycleState::new(
            cycle_id,
            config,
            AccountBalance {
                currency: "USDT".into(),
                free: dec!(1000),
                used: dec!(0),
                total: dec!(1000),
                timestamp: chrono::Utc::now(),
            },
            Vec::new(),
        );
        state.symbols = vec!["BTC/USDT".into()];
        state.ensure_runs();
        state
    }

    #[tokio::test]
    async fn test_roundtrip_identity() {
        let store = MemoryCheckpointStore::new();
        let state = sample_state(1);
        store.put("bot_1", 1, "market_state", &state).await.unwrap();

        let read = store
            .get("bot_1", 1, "market_state")
            .await
            .unwrap()
            .expect("checkpoint exists");
        assert_eq!(
            serde_json::to_vec(&state).unwrap(),
            serde_json::to_vec(&read).unwrap()
        );
    }

    #[tokio::test]
    async fn test_replay_does_not_overwrite() {
        // Once written, a checkpoint is immutable under retry
        let store = MemoryCheckpointStore::new();
        let first = sample_state(1);
        store.put("bot_1", 1, "execution", &first).await.unwrap();
        let original = store.raw("bot_1", 1, "execution").unwrap();

        let mut mutated = sample_state(1);
        mutated.record_error("execution", "retried with different state");
        store.put("bot_1", 1, "execution", &mutated).await.unwrap();

        assert_eq!(store.raw("bot_1", 1, "execution").unwrap(), original);
    }

    #[tokio::test]
    async fn test_latest_cycle_per_thread() {
        let store = MemoryCheckpointStore::new();
        store.put("bot_1", 3, "a", &sample_state(3)).await.unwrap();
        store.put("bot_1", 7, "a", &sample_state(7)).await.unwrap();
        store.put("bot_2", 9, "a", &sample_state(9)).await.unwrap();

        assert_eq!(store.latest_cycle("bot_1").await.unwrap(), Some(7));
        assert_eq!(store.latest_cycle("bot_2").await.unwrap(), Some(9));
        assert_eq!(store.latest_cycle("bot_3").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_nodes_for_cycle() {
        let store = MemoryCheckpointStore::new();
        store.put("bot_1", 1, "coins_pick", &sample_state(1)).await.unwrap();
        store.put("bot_1", 1, "market_state", &sample_state(1)).await.unwrap();

        let nodes = store.nodes_for_cycle("bot_1", 1).await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert!(nodes.contains(&"coins_pick".to_string()));
    }
}
