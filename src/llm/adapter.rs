//! The LLM adapter seam: structured completion against any provider.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;

use crate::error::LlmError;

/// Providers covered by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    /// OpenAI-compatible chat endpoints; any HTTP provider configured by
    /// base_url + api_key + model speaks this dialect
    Openai,
    Anthropic,
    Ollama,
}

impl FromStr for LlmProvider {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "openai" | "openai_compatible" | "custom" => Ok(LlmProvider::Openai),
            "anthropic" => Ok(LlmProvider::Anthropic),
            "ollama" => Ok(LlmProvider::Ollama),
            _ => Err("invalid provider; expected openai|anthropic|ollama"),
        }
    }
}

/// One row from `llm_configs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub id: i64,
    pub name: String,
    pub provider: LlmProvider,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f64,
    pub timeout_secs: u64,
    pub is_default: bool,
    /// Ordered fallback adapters tried when this one fails
    #[serde(default)]
    pub fallback_ids: Vec<i64>,
}

/// A single structured completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub prompt: String,
    /// JSON Schema the output must satisfy; providers use native schema
    /// constraints where available
    pub schema: Option<Value>,
    /// 0 by default so repeated identical prompts are deterministic
    pub temperature: f64,
    pub timeout: Duration,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            schema: None,
            temperature: 0.0,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Stable key for the per-cycle prompt cache.
    pub fn cache_key(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.system.hash(&mut hasher);
        self.prompt.hash(&mut hasher);
        self.schema.as_ref().map(|s| s.to_string()).hash(&mut hasher);
        hasher.finish()
    }
}

/// One LLM provider endpoint.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Run one completion, honouring the request timeout, and return the
    /// structured JSON output.
    async fn complete(&self, request: &CompletionRequest) -> Result<Value, LlmError>;
}

/// Parse a structured value into a typed record.
pub fn parse_structured<T: DeserializeOwned>(value: Value) -> Result<T, LlmError> {
    serde_json::from_value(value).map_err(|e| LlmError::Schema(e.to_string()))
}

/// Extract JSON from a response that may wrap it in markdown fences or prose.
pub fn extract_json(text: &str) -> &str {
    if let Some(start) = text.find("```json") {
        if let Some(end) = text[start + 7..].find("```") {
            return text[start + 7..start + 7 + end].trim();
        }
    }

    if let Some(start) = text.find("```") {
        if let Some(end) = text[start + 3..].find("```") {
            let content = text[start + 3..start + 3 + end].trim();
            if let Some(newline) = content.find('\n') {
                return content[newline + 1..].trim();
            }
            return content;
        }
    }

    if let Some(start) = text.find('{') {
        if let Some(end) = text.rfind('}') {
            if end > start {
                return &text[start..=end];
            }
        }
    }

    text.trim()
}

/// Map an HTTP status into the LLM error taxonomy.
pub fn error_from_status(status: u16, body: &str) -> LlmError {
    let message = body.chars().take(300).collect::<String>();
    match status {
        401 | 403 => LlmError::Auth(message),
        429 => LlmError::RateLimited(message),
        400 | 404 | 422 => LlmError::InvalidRequest(message),
        s => LlmError::Server { status: s, message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_json_from_code_block() {
        let text = "Here's my analysis:\n\n```json\n{\"trend\": \"bullish\"}\n```\n\nDone.";
        assert_eq!(extract_json(text), "{\"trend\": \"bullish\"}");
    }

    #[test]
    fn test_extract_json_raw_object() {
        let text = "Sure! {\"a\": 1, \"b\": {\"c\": 2}} hope that helps";
        assert_eq!(extract_json(text), "{\"a\": 1, \"b\": {\"c\": 2}}");
    }

    #[test]
    fn test_extract_json_plain() {
        assert_eq!(extract_json("  [1,2,3]  "), "[1,2,3]");
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(error_from_status(401, ""), LlmError::Auth(_)));
        assert!(matches!(
            error_from_status(429, ""),
            LlmError::RateLimited(_)
        ));
        assert!(matches!(
            error_from_status(400, ""),
            LlmError::InvalidRequest(_)
        ));
        assert!(matches!(
            error_from_status(503, ""),
            LlmError::Server { status: 503, .. }
        ));
    }

    #[test]
    fn test_cache_key_stable_and_sensitive() {
        let a = CompletionRequest::new("analyse BTC").with_schema(json!({"type": "object"}));
        let b = CompletionRequest::new("analyse BTC").with_schema(json!({"type": "object"}));
        let c = CompletionRequest::new("analyse ETH").with_schema(json!({"type": "object"}));
        assert_eq!(a.cache_key(), b.cache_key());
        assert_ne!(a.cache_key(), c.cache_key());
    }

    #[test]
    fn test_provider_parsing() {
        assert_eq!("openai".parse::<LlmProvider>(), Ok(LlmProvider::Openai));
        assert_eq!("custom".parse::<LlmProvider>(), Ok(LlmProvider::Openai));
        assert_eq!(
            "anthropic".parse::<LlmProvider>(),
            Ok(LlmProvider::Anthropic)
        );
        assert!("palm".parse::<LlmProvider>().is_err());
    }
}
