//! Fallback chains and the per-cycle prompt cache.
//!
//! Every LLM call in the pipeline is wrapped as
//! `primary -> with_fallbacks(...) -> timeout`: the chain tries each adapter
//! in order, degrading the decision but keeping the cycle alive. Timeouts are
//! first-class errors the chain can match on.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::error::LlmError;

use super::adapter::{parse_structured, CompletionRequest, LlmAdapter};

/// Ordered adapter chain: primary first, then fallbacks.
pub struct FallbackChain {
    adapters: Vec<Arc<dyn LlmAdapter>>,
}

impl FallbackChain {
    pub fn new(adapters: Vec<Arc<dyn LlmAdapter>>) -> Self {
        assert!(!adapters.is_empty(), "chain needs at least one adapter");
        Self { adapters }
    }

    pub fn single(adapter: Arc<dyn LlmAdapter>) -> Self {
        Self::new(vec![adapter])
    }

    pub fn primary_name(&self) -> &str {
        self.adapters[0].name()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Run the completion through the chain.
    pub async fn complete(&self, request: &CompletionRequest) -> Result<Value, LlmError> {
        let mut last_error: Option<LlmError> = None;

        for (idx, adapter) in self.adapters.iter().enumerate() {
            match adapter.complete(request).await {
                Ok(value) => {
                    if idx > 0 {
                        debug!(
                            adapter = adapter.name(),
                            position = idx,
                            "fallback adapter answered"
                        );
                    }
                    return Ok(value);
                }
                Err(e) => {
                    warn!(
                        adapter = adapter.name(),
                        position = idx,
                        "llm call failed: {}",
                        e
                    );
                    let stop = !e.triggers_fallback();
                    last_error = Some(e);
                    if stop {
                        break;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(LlmError::FallbacksExhausted {
            attempts: self.adapters.len(),
        }))
    }

    /// Completion parsed into a typed record.
    pub async fn complete_typed<T: DeserializeOwned>(
        &self,
        request: &CompletionRequest,
    ) -> Result<T, LlmError> {
        let value = self.complete(request).await?;
        parse_structured(value)
    }

    /// Completion through the per-cycle prompt cache. Repeated identical
    /// prompts within a cycle hit the cache; the cache is not reused across
    /// cycles.
    pub async fn complete_cached(
        &self,
        cache: &PromptCache,
        request: &CompletionRequest,
    ) -> Result<Value, LlmError> {
        let key = request.cache_key();
        if let Some(value) = cache.get(key) {
            debug!(adapter = self.primary_name(), "prompt cache hit");
            return Ok(value);
        }
        let value = self.complete(request).await?;
        cache.put(key, value.clone());
        Ok(value)
    }
}

/// Prompt-level memoization scoped to a single cycle.
#[derive(Default)]
pub struct PromptCache {
    entries: Mutex<HashMap<u64, Value>>,
}

impl PromptCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: u64) -> Option<Value> {
        self.entries.lock().unwrap().get(&key).cloned()
    }

    pub fn put(&self, key: u64, value: Value) {
        self.entries.lock().unwrap().insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Adapter scripted to fail N times then answer.
    struct ScriptedAdapter {
        name: String,
        failures: AtomicU32,
        error: fn() -> LlmError,
        answer: Value,
        calls: AtomicU32,
    }

    impl ScriptedAdapter {
        fn failing(name: &str, failures: u32, error: fn() -> LlmError) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                failures: AtomicU32::new(failures),
                error,
                answer: json!({"from": name}),
                calls: AtomicU32::new(0),
            })
        }

        fn healthy(name: &str) -> Arc<Self> {
            Self::failing(name, 0, || LlmError::Network("unused".into()))
        }
    }

    #[async_trait]
    impl LlmAdapter for ScriptedAdapter {
        fn name(&self) -> &str {
            &self.name
        }

        async fn complete(&self, _: &CompletionRequest) -> Result<Value, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err((self.error)());
            }
            Ok(self.answer.clone())
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest::new("prompt").with_timeout(Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_primary_answers_without_fallback() {
        let primary = ScriptedAdapter::healthy("primary");
        let backup = ScriptedAdapter::healthy("backup");
        let chain = FallbackChain::new(vec![primary.clone(), backup.clone()]);

        let value = chain.complete(&request()).await.unwrap();
        assert_eq!(value["from"], "primary");
        assert_eq!(backup.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_server_error_falls_through() {
        let primary = ScriptedAdapter::failing("primary", 10, || LlmError::Server {
            status: 500,
            message: "boom".into(),
        });
        let backup = ScriptedAdapter::healthy("backup");
        let chain = FallbackChain::new(vec![primary, backup]);

        let value = chain.complete(&request()).await.unwrap();
        assert_eq!(value["from"], "backup");
    }

    #[tokio::test]
    async fn test_timeout_falls_through() {
        let primary = ScriptedAdapter::failing("primary", 10, || {
            LlmError::Timeout(Duration::from_secs(120))
        });
        let backup = ScriptedAdapter::healthy("backup");
        let chain = FallbackChain::new(vec![primary, backup]);

        assert!(chain.complete(&request()).await.is_ok());
    }

    #[tokio::test]
    async fn test_all_failed_returns_last_error() {
        let a = ScriptedAdapter::failing("a", 10, || LlmError::Server {
            status: 500,
            message: "a down".into(),
        });
        let b = ScriptedAdapter::failing("b", 10, || LlmError::RateLimited("b busy".into()));
        let chain = FallbackChain::new(vec![a, b]);

        let err = chain.complete(&request()).await.unwrap_err();
        assert!(matches!(err, LlmError::RateLimited(_)));
    }

    #[tokio::test]
    async fn test_prompt_cache_dedupes_within_cycle() {
        let primary = ScriptedAdapter::healthy("primary");
        let chain = FallbackChain::new(vec![primary.clone()]);
        let cache = PromptCache::new();

        let req = request();
        chain.complete_cached(&cache, &req).await.unwrap();
        chain.complete_cached(&cache, &req).await.unwrap();
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);

        // A fresh cache (next cycle) calls out again
        let next_cycle = PromptCache::new();
        chain.complete_cached(&next_cycle, &req).await.unwrap();
        assert_eq!(primary.calls.load(Ordering::SeqCst), 2);
    }
}
