//! Ollama Provider
//!
//! Implements [`Provider`] for Ollama, a local model server typically at
//! http://localhost:11434.
//!
//! Key features:
//! - Local execution (no API keys required, always available)
//! - Structured output through Ollama's `format: "json"` mode
//! - Error mapping to [`ProviderError`]

use async_trait::async_trait;
use reqwest::Client;
use sdk::{Capability, CapabilitySet};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{
    extract_json, Message, MessageRole, Provider, ProviderError, Result, StructuredGeneration,
    TextGeneration,
};

/// Ollama provider
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    /// Base URL for Ollama API (typically http://localhost:11434)
    base_url: String,

    /// Model name to use (e.g., "llama3.1:8b")
    model: String,

    /// HTTP client for API requests
    client: Client,
}

impl OllamaProvider {
    /// Create a new Ollama provider
    ///
    /// # Arguments
    /// * `base_url` - Base URL for Ollama API (e.g., "http://localhost:11434")
    /// * `model` - Model name to use (e.g., "llama3.1:8b")
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .unwrap_or_default();

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client,
        }
    }

    /// Convert our Message format to Ollama's format
    fn convert_messages(&self, messages: &[Message]) -> Vec<OllamaMessage> {
        messages
            .iter()
            .map(|msg| OllamaMessage {
                role: match msg.role {
                    MessageRole::User => "user".to_string(),
                    MessageRole::Assistant => "assistant".to_string(),
                    MessageRole::System => "system".to_string(),
                },
                content: msg.content.clone(),
            })
            .collect()
    }

    async fn chat(&self, messages: &[Message], format: Option<&str>) -> Result<OllamaResponse> {
        let ollama_messages = self.convert_messages(messages);

        tracing::debug!(
            "Ollama request: model={}, messages={}, total_chars={}",
            self.model,
            ollama_messages.len(),
            ollama_messages
                .iter()
                .map(|m| m.content.len())
                .sum::<usize>()
        );

        let request = OllamaRequest {
            model: self.model.clone(),
            messages: ollama_messages,
            stream: false,
            format: format.map(str::to_string),
        };

        let url = format!("{}/api/chat", self.base_url);
        let start = std::time::Instant::now();
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout
                } else if e.is_connect() {
                    ProviderError::ProviderUnavailable(format!(
                        "Cannot connect to Ollama at {}. Is Ollama running?",
                        self.base_url
                    ))
                } else {
                    ProviderError::NetworkError(e.to_string())
                }
            })?;

        tracing::info!(
            "Ollama response received in {:.1}s",
            start.elapsed().as_secs_f64()
        );

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::ProviderUnavailable(format!(
                "Ollama API error ({}): {}",
                status, error_text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(format!("Failed to parse Ollama response: {}", e)))
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::new()
            .with(Capability::TextGeneration)
            .with(Capability::StructuredOutput)
    }

    async fn generate_text(&self, messages: &[Message]) -> Result<TextGeneration> {
        let response = self.chat(messages, None).await?;
        Ok(TextGeneration {
            tokens_used: response.token_count(),
            text: response.message.content,
        })
    }

    async fn generate_structured(
        &self,
        messages: &[Message],
        schema: &serde_json::Value,
    ) -> Result<StructuredGeneration> {
        let mut messages = messages.to_vec();
        messages.push(Message::system(format!(
            "Respond with JSON only, shaped like:\n{}",
            schema
        )));

        let response = self.chat(&messages, Some("json")).await?;
        let value = extract_json(&response.message.content).ok_or_else(|| {
            ProviderError::ParseError("Ollama did not return a JSON document".to_string())
        })?;

        Ok(StructuredGeneration {
            value,
            tokens_used: response.token_count(),
        })
    }
}

/// Ollama API request format
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
}

/// Ollama message format
#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

/// Ollama API response format
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

impl OllamaResponse {
    fn token_count(&self) -> Option<u64> {
        match (self.prompt_eval_count, self.eval_count) {
            (None, None) => None,
            (prompt, eval) => Some(prompt.unwrap_or(0) + eval.unwrap_or(0)),
        }
    }
}
