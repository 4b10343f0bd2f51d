//! Local Ollama adapter.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::LlmError;

use super::adapter::{error_from_status, extract_json, CompletionRequest, LlmAdapter, LlmConfig};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

pub struct OllamaAdapter {
    name: String,
    http: reqwest::Client,
    base_url: String,
    model: String,
    default_temperature: f64,
}

impl OllamaAdapter {
    pub fn new(http: reqwest::Client, config: &LlmConfig) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            name: config.name.clone(),
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            default_temperature: config.temperature,
        }
    }

    fn build_body(&self, request: &CompletionRequest) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
            "options": {
                "temperature": if request.temperature >= 0.0 {
                    request.temperature
                } else {
                    self.default_temperature
                },
            },
        });
        // Ollama accepts a JSON schema directly as the format constraint
        if let Some(schema) = &request.schema {
            body["format"] = schema.clone();
        }
        body
    }
}

#[async_trait]
impl LlmAdapter for OllamaAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Value, LlmError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = self.build_body(request);

        debug!(adapter = %self.name, model = %self.model, "ollama completion request");
        let response = self
            .http
            .post(&url)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(request.timeout)
                } else {
                    LlmError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        if !(200..300).contains(&status) {
            return Err(error_from_status(status, &text));
        }

        let parsed: Value =
            serde_json::from_str(&text).map_err(|e| LlmError::Schema(e.to_string()))?;
        let content = parsed["message"]["content"]
            .as_str()
            .ok_or_else(|| LlmError::Schema("missing message.content".into()))?;

        serde_json::from_str(extract_json(content))
            .map_err(|e| LlmError::Schema(format!("output is not valid JSON: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_passed_as_format() {
        let config = LlmConfig {
            id: 3,
            name: "local".into(),
            provider: super::super::adapter::LlmProvider::Ollama,
            base_url: None,
            api_key: None,
            model: "llama3".into(),
            temperature: 0.0,
            timeout_secs: 60,
            is_default: false,
            fallback_ids: vec![],
        };
        let adapter = OllamaAdapter::new(reqwest::Client::new(), &config);
        let request = CompletionRequest::new("hi")
            .with_schema(serde_json::json!({"type": "object"}));
        let body = adapter.build_body(&request);
        assert_eq!(body["format"]["type"], "object");
        assert_eq!(body["stream"], false);
    }
}
