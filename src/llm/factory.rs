//! Builds provider adapters and fallback chains from `llm_configs` rows.
//!
//! One factory per bot worker, holding the configs loaded at init. Chains are
//! memoized; the debate node uses `chain_for_role` to route each role to its
//! own LLM when the node config maps one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::error::{ConclaveError, Result};

use super::adapter::{LlmAdapter, LlmConfig, LlmProvider};
use super::anthropic::AnthropicAdapter;
use super::fallback::FallbackChain;
use super::ollama::OllamaAdapter;
use super::openai::OpenAiAdapter;

pub struct LlmFactory {
    http: reqwest::Client,
    configs: HashMap<i64, LlmConfig>,
    default_id: Option<i64>,
    chains: Mutex<HashMap<i64, Arc<FallbackChain>>>,
}

impl LlmFactory {
    pub fn new(configs: Vec<LlmConfig>) -> Self {
        let default_id = configs
            .iter()
            .find(|c| c.is_default)
            .or_else(|| configs.first())
            .map(|c| c.id);
        Self {
            http: reqwest::Client::new(),
            configs: configs.into_iter().map(|c| (c.id, c)).collect(),
            default_id,
            chains: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self, id: i64) -> Option<&LlmConfig> {
        self.configs.get(&id)
    }

    /// Register a prebuilt chain under a config id, overriding provider
    /// construction. Embedders use this to wire custom adapters.
    pub fn register_chain(&self, id: i64, chain: Arc<FallbackChain>) {
        self.chains.lock().unwrap().insert(id, chain);
    }

    fn build_adapter(&self, config: &LlmConfig) -> Arc<dyn LlmAdapter> {
        match config.provider {
            LlmProvider::Openai => Arc::new(OpenAiAdapter::new(self.http.clone(), config)),
            LlmProvider::Anthropic => Arc::new(AnthropicAdapter::new(self.http.clone(), config)),
            LlmProvider::Ollama => Arc::new(OllamaAdapter::new(self.http.clone(), config)),
        }
    }

    /// Chain for one config id: the adapter itself followed by its configured
    /// fallbacks, in order.
    pub fn chain(&self, id: i64) -> Result<Arc<FallbackChain>> {
        if let Some(chain) = self.chains.lock().unwrap().get(&id) {
            return Ok(chain.clone());
        }

        let config = self.configs.get(&id).ok_or_else(|| {
            ConclaveError::InvalidConfig(format!("llm config not found: id={}", id))
        })?;

        let mut adapters: Vec<Arc<dyn LlmAdapter>> = vec![self.build_adapter(config)];
        for fallback_id in &config.fallback_ids {
            match self.configs.get(fallback_id) {
                Some(fb) => adapters.push(self.build_adapter(fb)),
                None => warn!(
                    llm_id = id,
                    fallback_id, "fallback llm config not found, skipping"
                ),
            }
        }

        debug!(llm_id = id, depth = adapters.len(), "llm chain built");
        let chain = Arc::new(FallbackChain::new(adapters));
        self.chains.lock().unwrap().insert(id, chain.clone());
        Ok(chain)
    }

    /// Chain for an optional bot-level id, falling back to the default row.
    pub fn chain_or_default(&self, id: Option<i64>) -> Result<Arc<FallbackChain>> {
        let id = id.or(self.default_id).ok_or_else(|| {
            ConclaveError::InvalidConfig("no llm configs available".to_string())
        })?;
        self.chain(id)
    }

    /// Per-role routing: the node config's `role_llm_ids` wins, then the
    /// bot-level LLM, then the default.
    pub fn chain_for_role(
        &self,
        role: &str,
        role_llm_ids: &HashMap<String, i64>,
        bot_llm_id: Option<i64>,
    ) -> Result<Arc<FallbackChain>> {
        if let Some(id) = role_llm_ids.get(role) {
            match self.chain(*id) {
                Ok(chain) => return Ok(chain),
                Err(e) => warn!(role, llm_id = id, "role llm unusable, using bot default: {}", e),
            }
        }
        self.chain_or_default(bot_llm_id)
    }

    /// Timeout configured on a chain's primary config.
    pub fn timeout_for(&self, id: Option<i64>) -> Option<std::time::Duration> {
        let id = id.or(self.default_id)?;
        self.configs
            .get(&id)
            .map(|c| std::time::Duration::from_secs(c.timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(id: i64, name: &str, is_default: bool, fallback_ids: Vec<i64>) -> LlmConfig {
        LlmConfig {
            id,
            name: name.into(),
            provider: LlmProvider::Openai,
            base_url: Some("http://localhost:9999/v1".into()),
            api_key: None,
            model: "m".into(),
            temperature: 0.0,
            timeout_secs: 120,
            is_default,
            fallback_ids,
        }
    }

    #[test]
    fn test_chain_includes_fallbacks() {
        let factory = LlmFactory::new(vec![
            config(1, "primary", true, vec![2, 3]),
            config(2, "backup", false, vec![]),
            config(3, "last-resort", false, vec![]),
        ]);
        let chain = factory.chain(1).unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain.primary_name(), "primary");
    }

    #[test]
    fn test_missing_fallback_skipped() {
        let factory = LlmFactory::new(vec![config(1, "primary", true, vec![99])]);
        let chain = factory.chain(1).unwrap();
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_default_selection() {
        let factory = LlmFactory::new(vec![
            config(1, "a", false, vec![]),
            config(2, "b", true, vec![]),
        ]);
        let chain = factory.chain_or_default(None).unwrap();
        assert_eq!(chain.primary_name(), "b");
    }

    #[test]
    fn test_role_routing_prefers_role_map() {
        let factory = LlmFactory::new(vec![
            config(1, "default", true, vec![]),
            config(2, "bear-model", false, vec![]),
        ]);
        let roles = HashMap::from([("bear".to_string(), 2i64)]);

        let bear = factory.chain_for_role("bear", &roles, None).unwrap();
        assert_eq!(bear.primary_name(), "bear-model");

        let bull = factory.chain_for_role("bull", &roles, None).unwrap();
        assert_eq!(bull.primary_name(), "default");
    }

    #[test]
    fn test_unknown_id_errors() {
        let factory = LlmFactory::new(vec![config(1, "a", true, vec![])]);
        assert!(factory.chain(42).is_err());
    }
}
