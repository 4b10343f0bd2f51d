use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Main application configuration.
///
/// Layered from `config/default.toml`, an optional `config/local.toml`, and
/// `CONCLAVE__`-prefixed environment variables. Per-bot configuration lives in
/// the durable store and is re-read each cycle; this struct only carries
/// process-level settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub debate: DebateConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// EnvFilter directive, e.g. "info,conclave=debug"
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// Log file directory (bot logs are tailed from here for get_logs)
    #[serde(default = "default_log_dir")]
    pub dir: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            dir: default_log_dir(),
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

/// Scheduler and supervisor tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// How long the supervisor waits for a worker to drain before force-kill
    #[serde(default = "default_stop_deadline_secs")]
    pub stop_deadline_secs: u64,
    /// Bot config cache TTL; changes take effect on the next cycle boundary
    #[serde(default = "default_config_ttl_secs")]
    pub bot_config_ttl_secs: u64,
    /// Maintenance side-effects run every N cycles
    #[serde(default = "default_maintenance_every")]
    pub maintenance_every_cycles: u64,
    /// In-flight request cap per exchange regardless of token availability
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stop_deadline_secs: default_stop_deadline_secs(),
            bot_config_ttl_secs: default_config_ttl_secs(),
            maintenance_every_cycles: default_maintenance_every(),
            max_concurrent_requests: default_max_concurrent_requests(),
        }
    }
}

fn default_stop_deadline_secs() -> u64 {
    30
}

fn default_config_ttl_secs() -> u64 {
    60
}

fn default_maintenance_every() -> u64 {
    50
}

fn default_max_concurrent_requests() -> usize {
    10
}

/// TTLs per cache namespace, in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttls")]
    pub ttl_secs: HashMap<String, u64>,
    /// TTL applied to namespaces without an explicit entry
    #[serde(default = "default_cache_fallback_ttl")]
    pub fallback_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttls(),
            fallback_ttl_secs: default_cache_fallback_ttl(),
        }
    }
}

fn default_cache_ttls() -> HashMap<String, u64> {
    HashMap::from([
        ("tickers".to_string(), 10),
        ("ohlcv_3m".to_string(), 300),
        ("ohlcv_4h".to_string(), 3600),
        ("ohlcv".to_string(), 600),
        ("orderbook".to_string(), 60),
        ("trades".to_string(), 60),
        ("markets".to_string(), 3600),
        ("open_interests".to_string(), 600),
        ("coin_selection".to_string(), 600),
        ("backtest_ohlcv".to_string(), 86400 * 7),
    ])
}

fn default_cache_fallback_ttl() -> u64 {
    600
}

/// Debate engine defaults; overridable per node via `system_configs`.
#[derive(Debug, Clone, Deserialize)]
pub struct DebateConfig {
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    #[serde(default = "default_timeout_per_phase")]
    pub timeout_per_phase_secs: u64,
    #[serde(default = "default_trade_history_limit")]
    pub trade_history_limit: usize,
}

impl Default for DebateConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            timeout_per_phase_secs: default_timeout_per_phase(),
            trade_history_limit: default_trade_history_limit(),
        }
    }
}

fn default_max_rounds() -> u32 {
    2
}

fn default_timeout_per_phase() -> u64 {
    120
}

fn default_trade_history_limit() -> usize {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    /// BotStatus snapshots are published here as status/bot_{id}.json
    #[serde(default = "default_status_dir")]
    pub status_dir: String,
    /// Role prompt files (debate_analyst.txt etc.); embedded defaults otherwise
    #[serde(default = "default_prompts_dir")]
    pub prompts_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            status_dir: default_status_dir(),
            prompts_dir: default_prompts_dir(),
        }
    }
}

fn default_status_dir() -> String {
    "status".to_string()
}

fn default_prompts_dir() -> String {
    "prompts".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment.
    pub fn load() -> crate::error::Result<Self> {
        Self::load_from("config")
    }

    pub fn load_from(dir: impl AsRef<Path>) -> crate::error::Result<Self> {
        let dir = dir.as_ref();
        let cfg = Config::builder()
            .add_source(File::from(dir.join("default")).required(false))
            .add_source(File::from(dir.join("local")).required(false))
            .add_source(Environment::with_prefix("CONCLAVE").separator("__"))
            .build()?;

        let parsed: AppConfig = cfg.try_deserialize()?;
        let problems = parsed.validate();
        if !problems.is_empty() {
            return Err(crate::error::ConclaveError::InvalidConfig(
                problems.join("; "),
            ));
        }
        Ok(parsed)
    }

    /// Validate config invariants. Returns list of problems (empty = valid).
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.database.url.is_empty() {
            errors.push("database.url must be set".to_string());
        }
        if self.runtime.stop_deadline_secs == 0 {
            errors.push("runtime.stop_deadline_secs must be > 0".to_string());
        }
        if self.runtime.max_concurrent_requests == 0 {
            errors.push("runtime.max_concurrent_requests must be > 0".to_string());
        }
        if self.debate.max_rounds == 0 {
            errors.push("debate.max_rounds must be > 0".to_string());
        }
        errors
    }
}
