//! Language model client
//!
//! Narrow call contract: a prompt in, text out, with an explicit error the
//! generator converts into a deterministic fallback answer. The HTTP
//! implementation targets the Gemini generateContent API.

use crate::config::LlmConfig;
use crate::error::{Result, SibylError};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Http(String),

    #[error("LLM API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("LLM returned no text")]
    EmptyResponse,
}

/// Text generation service
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, prompt: &str) -> std::result::Result<String, LlmError>;

    fn model_name(&self) -> &str;
}

/// Gemini generateContent client
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiClient {
    /// Build from config; a missing API key is a configuration error, fatal
    /// at startup rather than per-request
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                SibylError::Config(format!(
                    "{} is not set; the answer generator requires an API key",
                    config.api_key_env
                ))
            })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| SibylError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn generate(&self, prompt: &str) -> std::result::Result<String, LlmError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );

        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        let text = payload["candidates"][0]["content"]["parts"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(LlmError::EmptyResponse);
        }

        Ok(text)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
