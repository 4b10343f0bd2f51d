//! PostgreSQL storage adapter.
//!
//! Schema bootstrap runs at most once per process family: a fast-path
//! `to_regclass` probe skips the DDL entirely when the core tables exist,
//! otherwise a process-advisory lock keyed by the store serialises creation
//! across workers.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, info, instrument};

use crate::domain::bot::{BotConfig, ExchangeConfig, QuantWeights, RiskLimits, TradingMode};
use crate::domain::decision::DecisionAction;
use crate::domain::order::{PositionSide, TradeRecord, TradeStatus};
use crate::error::{ConclaveError, Result};
use crate::llm::{LlmConfig, LlmProvider};
use crate::pipeline::graph::{WorkflowEdge, WorkflowNode, WorkflowSpec};

use super::store::{Store, TradeClose};

/// Advisory lock key guarding schema DDL; any stable value shared by every
/// process of the deployment works.
const SCHEMA_LOCK_KEY: i64 = 0x636f6e636c61_i64;

const SCHEMA_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS bots (
    id              BIGSERIAL PRIMARY KEY,
    name            TEXT NOT NULL UNIQUE,
    display_name    TEXT NOT NULL,
    exchange_id     BIGINT NOT NULL,
    workflow_id     BIGINT NOT NULL,
    llm_id          BIGINT,
    trading_mode    TEXT NOT NULL DEFAULT 'paper',
    cycle_interval_secs     BIGINT NOT NULL DEFAULT 300,
    max_concurrent_symbols  INT NOT NULL DEFAULT 5,
    timeframes      JSONB NOT NULL DEFAULT '["3m","4h"]',
    ohlcv_limits    JSONB NOT NULL DEFAULT '{}',
    indicator_configs JSONB NOT NULL DEFAULT 'null',
    quant_weights   JSONB NOT NULL DEFAULT 'null',
    quant_threshold DOUBLE PRECISION NOT NULL DEFAULT 50,
    risk_limits     JSONB NOT NULL DEFAULT 'null',
    tracing_project TEXT,
    is_active       BOOLEAN NOT NULL DEFAULT TRUE
);

CREATE TABLE IF NOT EXISTS exchanges (
    id          BIGSERIAL PRIMARY KEY,
    name        TEXT NOT NULL,
    kind        TEXT NOT NULL,
    testnet     BOOLEAN NOT NULL DEFAULT TRUE,
    api_key     TEXT,
    secret_key  TEXT,
    slippage    NUMERIC,
    commission  NUMERIC
);

CREATE TABLE IF NOT EXISTS llm_configs (
    id           BIGSERIAL PRIMARY KEY,
    name         TEXT NOT NULL,
    provider     TEXT NOT NULL,
    base_url     TEXT,
    api_key      TEXT,
    model        TEXT NOT NULL,
    temperature  DOUBLE PRECISION NOT NULL DEFAULT 0,
    timeout_secs BIGINT NOT NULL DEFAULT 120,
    is_default   BOOLEAN NOT NULL DEFAULT FALSE,
    fallback_ids JSONB NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS workflows (
    id          BIGSERIAL PRIMARY KEY,
    name        TEXT NOT NULL,
    version     INT NOT NULL DEFAULT 1,
    user_edited BOOLEAN NOT NULL DEFAULT FALSE
);

CREATE TABLE IF NOT EXISTS workflow_nodes (
    id              BIGSERIAL PRIMARY KEY,
    workflow_id     BIGINT NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
    name            TEXT NOT NULL,
    plugin_name     TEXT NOT NULL,
    execution_order INT NOT NULL DEFAULT 0,
    enabled         BOOLEAN NOT NULL DEFAULT TRUE,
    UNIQUE (workflow_id, name)
);

CREATE TABLE IF NOT EXISTS workflow_edges (
    id          BIGSERIAL PRIMARY KEY,
    workflow_id BIGINT NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
    from_node   TEXT NOT NULL,
    to_node     TEXT NOT NULL,
    condition   TEXT
);

CREATE TABLE IF NOT EXISTS node_configs (
    id          BIGSERIAL PRIMARY KEY,
    node_id     BIGINT NOT NULL REFERENCES workflow_nodes(id) ON DELETE CASCADE,
    config      JSONB NOT NULL DEFAULT '{}',
    UNIQUE (node_id)
);

CREATE TABLE IF NOT EXISTS trade_history (
    id          BIGSERIAL PRIMARY KEY,
    bot_id      BIGINT NOT NULL,
    symbol      TEXT NOT NULL,
    side        TEXT NOT NULL,
    action      TEXT NOT NULL,
    entry_price NUMERIC NOT NULL,
    exit_price  NUMERIC,
    amount      NUMERIC NOT NULL,
    leverage    INT NOT NULL DEFAULT 1,
    pnl_usd     NUMERIC,
    pnl_percent DOUBLE PRECISION,
    fee_paid    NUMERIC,
    status      TEXT NOT NULL DEFAULT 'open',
    opened_at   TIMESTAMPTZ NOT NULL,
    closed_at   TIMESTAMPTZ,
    cycle_id    BIGINT NOT NULL,
    order_id    TEXT,
    UNIQUE (bot_id, cycle_id, symbol, action)
);

CREATE UNIQUE INDEX IF NOT EXISTS trade_history_one_open
    ON trade_history (bot_id, symbol) WHERE status = 'open';

CREATE TABLE IF NOT EXISTS system_configs (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- State is TEXT, not JSONB: a checkpoint re-read must return the exact
-- bytes that were written, and JSONB normalizes key order
CREATE TABLE IF NOT EXISTS checkpoints (
    thread_id  TEXT NOT NULL,
    cycle_id   BIGINT NOT NULL,
    node_name  TEXT NOT NULL,
    state      TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (thread_id, cycle_id, node_name)
);
"#;

/// PostgreSQL storage adapter.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        info!("connected to PostgreSQL");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Ensure the schema exists.
    ///
    /// Fast path: if the primary table already exists, return without
    /// touching DDL or the lock. Otherwise take the advisory lock, re-check
    /// and create.
    pub async fn init_schema(&self) -> Result<()> {
        if self.schema_present().await? {
            debug!("schema present, skipping bootstrap");
            return Ok(());
        }

        let mut conn = self.pool.acquire().await?;
        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(SCHEMA_LOCK_KEY)
            .execute(&mut *conn)
            .await?;

        let result = async {
            if self.schema_present().await? {
                debug!("schema created by a sibling process while waiting on lock");
                return Ok(());
            }
            sqlx::raw_sql(SCHEMA_DDL).execute(&self.pool).await?;
            info!("database schema created");
            Ok(())
        }
        .await;

        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(SCHEMA_LOCK_KEY)
            .execute(&mut *conn)
            .await?;

        result
    }

    async fn schema_present(&self) -> Result<bool> {
        let row = sqlx::query("SELECT to_regclass('public.bots') IS NOT NULL AS present")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<bool, _>("present"))
    }

    fn bot_from_row(row: &sqlx::postgres::PgRow) -> Result<BotConfig> {
        let mode: String = row.get("trading_mode");
        let timeframes: serde_json::Value = row.get("timeframes");
        let ohlcv_limits: serde_json::Value = row.get("ohlcv_limits");
        let quant_weights: serde_json::Value = row.get("quant_weights");
        let risk_limits: serde_json::Value = row.get("risk_limits");

        Ok(BotConfig {
            id: row.get("id"),
            name: row.get("name"),
            display_name: row.get("display_name"),
            exchange_id: row.get("exchange_id"),
            workflow_id: row.get("workflow_id"),
            llm_id: row.get("llm_id"),
            trading_mode: TradingMode::from_str(&mode)
                .map_err(|e| ConclaveError::InvalidConfig(e.to_string()))?,
            cycle_interval_secs: row.get::<i64, _>("cycle_interval_secs").max(1) as u64,
            max_concurrent_symbols: row.get::<i32, _>("max_concurrent_symbols").max(1) as usize,
            timeframes: serde_json::from_value(timeframes).unwrap_or_default(),
            ohlcv_limits: serde_json::from_value(ohlcv_limits).unwrap_or_default(),
            indicator_configs: row.get("indicator_configs"),
            quant_weights: serde_json::from_value(quant_weights)
                .unwrap_or_else(|_| QuantWeights::default()),
            quant_threshold: row.get("quant_threshold"),
            risk_limits: serde_json::from_value(risk_limits)
                .unwrap_or_else(|_| RiskLimits::default()),
            tracing_project: row.get("tracing_project"),
            is_active: row.get("is_active"),
        })
    }

    fn trade_from_row(row: &sqlx::postgres::PgRow) -> Result<TradeRecord> {
        let side: String = row.get("side");
        let action: String = row.get("action");
        let status: String = row.get("status");
        Ok(TradeRecord {
            id: Some(row.get("id")),
            bot_id: row.get("bot_id"),
            symbol: row.get("symbol"),
            side: PositionSide::from_str(&side).ok_or_else(|| {
                ConclaveError::InvalidState(format!("bad trade side '{}'", side))
            })?,
            action: DecisionAction::from_str(&action).ok_or_else(|| {
                ConclaveError::InvalidState(format!("bad trade action '{}'", action))
            })?,
            entry_price: row.get("entry_price"),
            exit_price: row.get("exit_price"),
            amount: row.get("amount"),
            leverage: row.get::<i32, _>("leverage").max(1) as u32,
            pnl_usd: row.get("pnl_usd"),
            pnl_percent: row.get("pnl_percent"),
            fee_paid: row.get("fee_paid"),
            status: if status == "open" {
                TradeStatus::Open
            } else {
                TradeStatus::Closed
            },
            opened_at: row.get("opened_at"),
            closed_at: row.get("closed_at"),
            cycle_id: row.get("cycle_id"),
            order_id: row.get("order_id"),
        })
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn list_bots(&self) -> Result<Vec<BotConfig>> {
        let rows = sqlx::query("SELECT * FROM bots ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::bot_from_row).collect()
    }

    async fn get_bot(&self, id: i64) -> Result<Option<BotConfig>> {
        let row = sqlx::query("SELECT * FROM bots WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::bot_from_row).transpose()
    }

    #[instrument(skip(self, config), fields(bot = %config.name))]
    async fn create_bot(&self, config: &BotConfig) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO bots (
                name, display_name, exchange_id, workflow_id, llm_id,
                trading_mode, cycle_interval_secs, max_concurrent_symbols,
                timeframes, ohlcv_limits, indicator_configs,
                quant_weights, quant_threshold, risk_limits,
                tracing_project, is_active
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16)
            RETURNING id
            "#,
        )
        .bind(&config.name)
        .bind(&config.display_name)
        .bind(config.exchange_id)
        .bind(config.workflow_id)
        .bind(config.llm_id)
        .bind(config.trading_mode.as_str())
        .bind(config.cycle_interval_secs as i64)
        .bind(config.max_concurrent_symbols as i32)
        .bind(serde_json::to_value(&config.timeframes)?)
        .bind(serde_json::to_value(&config.ohlcv_limits)?)
        .bind(&config.indicator_configs)
        .bind(serde_json::to_value(&config.quant_weights)?)
        .bind(config.quant_threshold)
        .bind(serde_json::to_value(&config.risk_limits)?)
        .bind(&config.tracing_project)
        .bind(config.is_active)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("id"))
    }

    async fn update_bot(&self, config: &BotConfig) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE bots SET
                name = $2, display_name = $3, exchange_id = $4, workflow_id = $5,
                llm_id = $6, trading_mode = $7, cycle_interval_secs = $8,
                max_concurrent_symbols = $9, timeframes = $10, ohlcv_limits = $11,
                indicator_configs = $12, quant_weights = $13, quant_threshold = $14,
                risk_limits = $15, tracing_project = $16, is_active = $17
            WHERE id = $1
            "#,
        )
        .bind(config.id)
        .bind(&config.name)
        .bind(&config.display_name)
        .bind(config.exchange_id)
        .bind(config.workflow_id)
        .bind(config.llm_id)
        .bind(config.trading_mode.as_str())
        .bind(config.cycle_interval_secs as i64)
        .bind(config.max_concurrent_symbols as i32)
        .bind(serde_json::to_value(&config.timeframes)?)
        .bind(serde_json::to_value(&config.ohlcv_limits)?)
        .bind(&config.indicator_configs)
        .bind(serde_json::to_value(&config.quant_weights)?)
        .bind(config.quant_threshold)
        .bind(serde_json::to_value(&config.risk_limits)?)
        .bind(&config.tracing_project)
        .bind(config.is_active)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ConclaveError::InvalidState(format!(
                "bot not found: id={}",
                config.id
            )));
        }
        Ok(())
    }

    async fn delete_bot(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM bots WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_exchange(&self, id: i64) -> Result<Option<ExchangeConfig>> {
        let row = sqlx::query("SELECT * FROM exchanges WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| ExchangeConfig {
            id: r.get("id"),
            name: r.get("name"),
            kind: r.get("kind"),
            testnet: r.get("testnet"),
            api_key: r.get("api_key"),
            secret_key: r.get("secret_key"),
            slippage: r.get::<Option<Decimal>, _>("slippage"),
            commission: r.get::<Option<Decimal>, _>("commission"),
        }))
    }

    async fn list_llm_configs(&self) -> Result<Vec<LlmConfig>> {
        let rows = sqlx::query("SELECT * FROM llm_configs ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| {
                let provider: String = r.get("provider");
                let fallback_ids: serde_json::Value = r.get("fallback_ids");
                Ok(LlmConfig {
                    id: r.get("id"),
                    name: r.get("name"),
                    provider: LlmProvider::from_str(&provider)
                        .map_err(|e| ConclaveError::InvalidConfig(e.to_string()))?,
                    base_url: r.get("base_url"),
                    api_key: r.get("api_key"),
                    model: r.get("model"),
                    temperature: r.get("temperature"),
                    timeout_secs: r.get::<i64, _>("timeout_secs").max(1) as u64,
                    is_default: r.get("is_default"),
                    fallback_ids: serde_json::from_value(fallback_ids).unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn get_workflow(&self, id: i64) -> Result<Option<WorkflowSpec>> {
        let workflow = sqlx::query("SELECT * FROM workflows WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(workflow) = workflow else {
            return Ok(None);
        };

        let node_rows = sqlx::query(
            r#"
            SELECT n.id, n.name, n.plugin_name, n.execution_order, n.enabled,
                   COALESCE(c.config, '{}'::jsonb) AS config
            FROM workflow_nodes n
            LEFT JOIN node_configs c ON c.node_id = n.id
            WHERE n.workflow_id = $1
            ORDER BY n.execution_order
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let edge_rows = sqlx::query(
            "SELECT from_node, to_node, condition FROM workflow_edges WHERE workflow_id = $1",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(WorkflowSpec {
            id: workflow.get("id"),
            name: workflow.get("name"),
            version: workflow.get("version"),
            user_edited: workflow.get("user_edited"),
            nodes: node_rows
                .iter()
                .map(|r| WorkflowNode {
                    id: r.get("id"),
                    name: r.get("name"),
                    plugin_name: r.get("plugin_name"),
                    execution_order: r.get("execution_order"),
                    enabled: r.get("enabled"),
                    config: r.get("config"),
                })
                .collect(),
            edges: edge_rows
                .iter()
                .map(|r| WorkflowEdge {
                    from_node: r.get("from_node"),
                    to_node: r.get("to_node"),
                    condition: r.get("condition"),
                })
                .collect(),
        }))
    }

    #[instrument(skip(self, spec), fields(workflow = %spec.name))]
    async fn save_workflow(&self, spec: &WorkflowSpec) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO workflows (id, name, version, user_edited)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                version = workflows.version + 1,
                user_edited = EXCLUDED.user_edited
            RETURNING id
            "#,
        )
        .bind(spec.id)
        .bind(&spec.name)
        .bind(spec.version)
        .bind(spec.user_edited)
        .fetch_one(&mut *tx)
        .await?;
        let workflow_id: i64 = row.get("id");

        sqlx::query("DELETE FROM workflow_nodes WHERE workflow_id = $1")
            .bind(workflow_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM workflow_edges WHERE workflow_id = $1")
            .bind(workflow_id)
            .execute(&mut *tx)
            .await?;

        for node in &spec.nodes {
            let node_row = sqlx::query(
                r#"
                INSERT INTO workflow_nodes
                    (workflow_id, name, plugin_name, execution_order, enabled)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id
                "#,
            )
            .bind(workflow_id)
            .bind(&node.name)
            .bind(&node.plugin_name)
            .bind(node.execution_order)
            .bind(node.enabled)
            .fetch_one(&mut *tx)
            .await?;
            let node_id: i64 = node_row.get("id");

            if !node.config.is_null() {
                sqlx::query("INSERT INTO node_configs (node_id, config) VALUES ($1, $2)")
                    .bind(node_id)
                    .bind(&node.config)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        for edge in &spec.edges {
            sqlx::query(
                r#"
                INSERT INTO workflow_edges (workflow_id, from_node, to_node, condition)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(workflow_id)
            .bind(&edge.from_node)
            .bind(&edge.to_node)
            .bind(&edge.condition)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(workflow_id, "workflow saved atomically");
        Ok(workflow_id)
    }

    async fn insert_trade(&self, trade: &TradeRecord) -> Result<Option<i64>> {
        let row = sqlx::query(
            r#"
            INSERT INTO trade_history (
                bot_id, symbol, side, action, entry_price, exit_price, amount,
                leverage, pnl_usd, pnl_percent, fee_paid, status,
                opened_at, closed_at, cycle_id, order_id
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16)
            ON CONFLICT (bot_id, cycle_id, symbol, action) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(trade.bot_id)
        .bind(&trade.symbol)
        .bind(trade.side.as_str())
        .bind(trade.action.as_str())
        .bind(trade.entry_price)
        .bind(trade.exit_price)
        .bind(trade.amount)
        .bind(trade.leverage as i32)
        .bind(trade.pnl_usd)
        .bind(trade.pnl_percent)
        .bind(trade.fee_paid)
        .bind(trade.status.as_str())
        .bind(trade.opened_at)
        .bind(trade.closed_at)
        .bind(trade.cycle_id)
        .bind(&trade.order_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get("id")))
    }

    async fn close_trade(&self, close: &TradeClose) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE trade_history SET
                status = 'closed',
                exit_price = $3,
                pnl_usd = $4,
                pnl_percent = $5,
                fee_paid = COALESCE(fee_paid, 0) + $6,
                closed_at = $7
            WHERE bot_id = $1 AND symbol = $2 AND status = 'open'
            "#,
        )
        .bind(close.bot_id)
        .bind(&close.symbol)
        .bind(close.exit_price)
        .bind(close.pnl_usd)
        .bind(close.pnl_percent)
        .bind(close.fee_paid)
        .bind(close.closed_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn open_trade(&self, bot_id: i64, symbol: &str) -> Result<Option<TradeRecord>> {
        let row = sqlx::query(
            "SELECT * FROM trade_history WHERE bot_id = $1 AND symbol = $2 AND status = 'open'",
        )
        .bind(bot_id)
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::trade_from_row).transpose()
    }

    async fn open_trades(&self, bot_id: i64) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM trade_history WHERE bot_id = $1 AND status = 'open' ORDER BY opened_at",
        )
        .bind(bot_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::trade_from_row).collect()
    }

    async fn recent_closed_trades(&self, bot_id: i64, limit: usize) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM trade_history
            WHERE bot_id = $1 AND status = 'closed'
            ORDER BY closed_at DESC
            LIMIT $2
            "#,
        )
        .bind(bot_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::trade_from_row).collect()
    }

    async fn trade_exists(
        &self,
        bot_id: i64,
        cycle_id: i64,
        symbol: &str,
        action: DecisionAction,
    ) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM trade_history
                WHERE bot_id = $1 AND cycle_id = $2 AND symbol = $3 AND action = $4
            ) AS present
            "#,
        )
        .bind(bot_id)
        .bind(cycle_id)
        .bind(symbol)
        .bind(action.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("present"))
    }

    async fn get_system_config(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM system_configs WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("value")))
    }

    async fn set_system_config(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO system_configs (key, value) VALUES ($1, $2)
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn system_configs_with_prefix(
        &self,
        prefix: &str,
    ) -> Result<HashMap<String, String>> {
        let rows = sqlx::query("SELECT key, value FROM system_configs WHERE key LIKE $1 || '%'")
            .bind(prefix)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get("key"), r.get("value")))
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
