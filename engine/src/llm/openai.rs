//! OpenAI-compatible provider
//!
//! Works against api.openai.com and any server exposing the same
//! `/chat/completions` and `/embeddings` endpoints. The API key is read from
//! the environment variable named in `[llm.openai] api_key_env`.

use super::{LLMError, LLMProvider, Message};
use crate::config::OpenAIConfig;
use async_trait::async_trait;
use serde_json::json;

pub struct OpenAIProvider {
    base_url: String,
    api_key_env: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: &OpenAIConfig, model: impl Into<String>) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key_env: config.api_key_env.clone(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }

    fn api_key(&self) -> super::Result<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                LLMError::AuthenticationFailed(format!("{} is not set", self.api_key_env))
            })
    }

    async fn post(&self, path: &str, payload: serde_json::Value) -> super::Result<serde_json::Value> {
        let api_key = self.api_key()?;
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LLMError::Timeout
                } else if e.is_connect() {
                    LLMError::ProviderUnavailable(format!("Cannot connect to {}", self.base_url))
                } else {
                    LLMError::NetworkError(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();

            return Err(match status.as_u16() {
                401 | 403 => LLMError::AuthenticationFailed(text),
                429 => LLMError::RateLimitExceeded,
                s if s >= 500 => LLMError::ProviderUnavailable(format!("{}: {}", status, text)),
                _ => LLMError::InvalidRequest(text),
            });
        }

        response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(e.to_string()))
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn is_local(&self) -> bool {
        false
    }

    async fn check_health(&self) -> bool {
        self.api_key().is_ok()
    }

    async fn generate(&self, messages: &[Message]) -> super::Result<String> {
        let api_messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|msg| {
                json!({
                    "role": msg.role.to_string(),
                    "content": msg.content
                })
            })
            .collect();

        let data = self
            .post(
                "/chat/completions",
                json!({
                    "model": self.model,
                    "messages": api_messages,
                }),
            )
            .await?;

        let choice = data
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .ok_or_else(|| LLMError::ParseError("No choices in response".to_string()))?;

        choice
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| LLMError::ParseError("Empty content".to_string()))
    }

    async fn embed(&self, text: &str) -> super::Result<Vec<f32>> {
        let data = self
            .post(
                "/embeddings",
                json!({
                    "model": self.model,
                    "input": text,
                }),
            )
            .await?;

        let values = data
            .get("data")
            .and_then(|d| d.as_array())
            .and_then(|d| d.first())
            .and_then(|e| e.get("embedding"))
            .and_then(|e| e.as_array())
            .ok_or_else(|| LLMError::ParseError("No embedding in response".to_string()))?;

        values
            .iter()
            .map(|v| {
                v.as_f64()
                    .map(|f| f as f32)
                    .ok_or_else(|| LLMError::ParseError("Non-numeric embedding value".to_string()))
            })
            .collect()
    }
}
