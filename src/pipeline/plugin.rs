//! Plugin protocol: metadata + run(state, context) -> state'.
//!
//! A node is a transformation over CycleState, not a side-effecting callback;
//! anything it needs beyond the state arrives through the PluginContext.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

use crate::adapters::store::Store;
use crate::config::DebateConfig;
use crate::domain::bot::{BotConfig, ExchangeConfig};
use crate::domain::state::CycleState;
use crate::error::{ConclaveError, ErrorKind};
use crate::exchange::RateLimitedClient;
use crate::llm::{LlmFactory, PromptCache};
use crate::market::{MarketCache, MarketDataService, StreamManager};

/// Node registration metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub name: String,
    pub display_name: String,
    /// data_source, analysis, decision, execution, monitoring
    pub category: String,
    /// Auto-sync places new nodes after this one when wiring a workflow
    #[serde(default)]
    pub insert_after: Option<String>,
    pub suggested_order: i32,
    pub requires_llm: bool,
    pub requires_trader: bool,
}

/// How a node failure affects the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeFailureKind {
    /// Recorded into the state; the graph continues along the default edge
    Recoverable,
    /// Aborts the cycle
    Fatal,
}

#[derive(Debug, Clone)]
pub struct NodeError {
    pub kind: NodeFailureKind,
    pub message: String,
}

impl NodeError {
    pub fn recoverable(message: impl Into<String>) -> Self {
        Self {
            kind: NodeFailureKind::Recoverable,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: NodeFailureKind::Fatal,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {}",
            match self.kind {
                NodeFailureKind::Recoverable => "recoverable",
                NodeFailureKind::Fatal => "fatal",
            },
            self.message
        )
    }
}

impl From<ConclaveError> for NodeError {
    fn from(err: ConclaveError) -> Self {
        // Configuration problems and store/auth failures sink the cycle;
        // anything transient or per-symbol stays recoverable
        let kind = match err.kind() {
            ErrorKind::Configuration | ErrorKind::Fatal | ErrorKind::Cancelled => {
                NodeFailureKind::Fatal
            }
            _ => NodeFailureKind::Recoverable,
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

/// Shared services threaded into every node invocation.
///
/// Built once per cycle so the bot snapshot and prompt cache have cycle
/// scope; the heavyweight members are Arcs shared across cycles.
#[derive(Clone)]
pub struct PluginContext {
    pub exchange: Arc<RateLimitedClient>,
    pub market: Arc<MarketDataService>,
    pub cache: Arc<MarketCache>,
    pub streams: Arc<StreamManager>,
    pub llm: Arc<LlmFactory>,
    pub store: Arc<dyn Store>,
    pub bot: Arc<BotConfig>,
    pub exchange_config: Arc<ExchangeConfig>,
    /// Fresh per cycle; never reused across cycles
    pub prompt_cache: Arc<PromptCache>,
    pub debate_defaults: DebateConfig,
    pub prompts_dir: Option<PathBuf>,
    /// Hierarchical stop signal; nodes poll this at suspension points
    pub shutdown: watch::Receiver<bool>,
}

impl PluginContext {
    pub fn is_cancelled(&self) -> bool {
        *self.shutdown.borrow()
    }
}

impl std::fmt::Debug for dyn NodePlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodePlugin")
            .field("name", &self.metadata().name)
            .finish()
    }
}

/// The node plugin seam. Registered by name, composed into workflows.
#[async_trait]
pub trait NodePlugin: Send + Sync {
    fn metadata(&self) -> &NodeMetadata;

    /// Transform the cycle state. Errors are classified Recoverable/Fatal;
    /// cancellation must be honoured at every suspension point.
    async fn run(
        &self,
        state: CycleState,
        ctx: &PluginContext,
    ) -> std::result::Result<CycleState, NodeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        let e: NodeError = ConclaveError::Stream("reset".into()).into();
        assert_eq!(e.kind, NodeFailureKind::Recoverable);

        let e: NodeError = ConclaveError::UnknownPlugin("x".into()).into();
        assert_eq!(e.kind, NodeFailureKind::Fatal);

        let e: NodeError = ConclaveError::Timeout(std::time::Duration::from_secs(1)).into();
        assert_eq!(e.kind, NodeFailureKind::Recoverable);

        let e: NodeError = ConclaveError::Auth("revoked".into()).into();
        assert_eq!(e.kind, NodeFailureKind::Fatal);
    }
}
