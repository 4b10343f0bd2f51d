//! Anthropic Messages adapter.
//!
//! Structured output is enforced by publishing the schema as a forced tool:
//! the model must call `emit_structured_output` and the tool input is the
//! typed record.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::LlmError;

use super::adapter::{error_from_status, extract_json, CompletionRequest, LlmAdapter, LlmConfig};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const STRUCTURED_TOOL: &str = "emit_structured_output";
const MAX_TOKENS: u32 = 4096;

pub struct AnthropicAdapter {
    name: String,
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    default_temperature: f64,
}

impl AnthropicAdapter {
    pub fn new(http: reqwest::Client, config: &LlmConfig) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            name: config.name.clone(),
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            default_temperature: config.temperature,
        }
    }

    fn build_body(&self, request: &CompletionRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": [{"role": "user", "content": request.prompt}],
            "temperature": if request.temperature >= 0.0 {
                request.temperature
            } else {
                self.default_temperature
            },
        });
        if let Some(system) = &request.system {
            body["system"] = json!(system);
        }
        if let Some(schema) = &request.schema {
            body["tools"] = json!([{
                "name": STRUCTURED_TOOL,
                "description": "Emit the structured result for this request.",
                "input_schema": schema,
            }]);
            body["tool_choice"] = json!({"type": "tool", "name": STRUCTURED_TOOL});
        }
        body
    }

    fn parse_content(content: &Value) -> Result<Value, LlmError> {
        let blocks = content
            .as_array()
            .ok_or_else(|| LlmError::Schema("content is not an array".into()))?;

        for block in blocks {
            if block["type"] == "tool_use" && block["name"] == STRUCTURED_TOOL {
                return Ok(block["input"].clone());
            }
        }
        for block in blocks {
            if block["type"] == "text" {
                let text = block["text"].as_str().unwrap_or_default();
                return serde_json::from_str(extract_json(text))
                    .map_err(|e| LlmError::Schema(format!("output is not valid JSON: {}", e)));
            }
        }
        Err(LlmError::Schema("no usable content block".into()))
    }
}

#[async_trait]
impl LlmAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Value, LlmError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_body(request);

        let mut builder = self
            .http
            .post(&url)
            .timeout(request.timeout)
            .header("anthropic-version", API_VERSION)
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.header("x-api-key", key);
        }

        debug!(adapter = %self.name, model = %self.model, "anthropic completion request");
        let response = builder.send().await.map_err(|e| {
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
        Self::parse_content(&parsed["content"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LlmConfig {
        LlmConfig {
            id: 2,
            name: "claude".into(),
            provider: super::super::adapter::LlmProvider::Anthropic,
            base_url: None,
            api_key: Some("sk-ant-test".into()),
            model: "claude-sonnet".into(),
            temperature: 0.0,
            timeout_secs: 120,
            is_default: false,
            fallback_ids: vec![],
        }
    }

    #[test]
    fn test_schema_becomes_forced_tool() {
        let adapter = AnthropicAdapter::new(reqwest::Client::new(), &config());
        let request = CompletionRequest::new("decide")
            .with_schema(serde_json::json!({"type": "object", "properties": {}}));
        let body = adapter.build_body(&request);
        assert_eq!(body["tools"][0]["name"], STRUCTURED_TOOL);
        assert_eq!(body["tool_choice"]["type"], "tool");
    }

    #[test]
    fn test_parse_tool_use_block() {
        let content = serde_json::json!([
            {"type": "text", "text": "thinking..."},
            {"type": "tool_use", "name": STRUCTURED_TOOL, "input": {"action": "wait"}},
        ]);
        let value = AnthropicAdapter::parse_content(&content).unwrap();
        assert_eq!(value["action"], "wait");
    }

    #[test]
    fn test_parse_text_fallback() {
        let content = serde_json::json!([
            {"type": "text", "text": "```json\n{\"action\": \"long\"}\n```"},
        ]);
        let value = AnthropicAdapter::parse_content(&content).unwrap();
        assert_eq!(value["action"], "long");
    }

    #[test]
    fn test_parse_empty_content_is_schema_error() {
        let content = serde_json::json!([]);
        assert!(matches!(
            AnthropicAdapter::parse_content(&content),
            Err(LlmError::Schema(_))
        ));
    }
}
