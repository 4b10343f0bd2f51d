//! OpenAI-compatible chat completions adapter.
//!
//! Also serves any custom HTTP provider configured by base_url + api_key +
//! model, since those speak the same dialect.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::LlmError;

use super::adapter::{error_from_status, extract_json, CompletionRequest, LlmAdapter, LlmConfig};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiAdapter {
    name: String,
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    default_temperature: f64,
}

impl OpenAiAdapter {
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
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": if request.temperature >= 0.0 {
                request.temperature
            } else {
                self.default_temperature
            },
        });

        if let Some(schema) = &request.schema {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {
                    "name": "structured_output",
                    "schema": schema,
                    "strict": true,
                },
            });
        }
        body
    }
}

#[async_trait]
impl LlmAdapter for OpenAiAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Value, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(request);

        let mut builder = self.http.post(&url).timeout(request.timeout).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        debug!(adapter = %self.name, model = %self.model, "openai completion request");
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
        let content = parsed["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| LlmError::Schema("missing choices[0].message.content".into()))?;

        serde_json::from_str(extract_json(content))
            .map_err(|e| LlmError::Schema(format!("output is not valid JSON: {}", e)))
    }
}
