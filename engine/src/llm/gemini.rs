use super::{
    extract_json, Message, MessageRole, Provider, ProviderError, SearchGeneration, Source,
    StructuredGeneration, TextGeneration,
};
use crate::config::GeminiConfig;
use async_trait::async_trait;
use sdk::{Capability, CapabilitySet};
use serde_json::json;

/// Google Gemini provider
///
/// The only built-in provider with [`Capability::WebSearch`], through the
/// `google_search` grounding tool. Available iff its API key is present.
pub struct GeminiProvider {
    config: GeminiConfig,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl GeminiProvider {
    /// Create a provider, reading the API key from `config.api_key_env`
    pub fn new(config: GeminiConfig) -> Self {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: GeminiConfig, api_key: Option<String>) -> Self {
        Self {
            config,
            api_key,
            client: reqwest::Client::new(),
        }
    }

    fn build_payload(messages: &[Message]) -> serde_json::Map<String, serde_json::Value> {
        let mut contents = Vec::new();
        let mut system_parts = Vec::new();

        for msg in messages {
            if msg.role == MessageRole::System {
                system_parts.push(json!({"text": msg.content}));
                continue;
            }

            contents.push(json!({
                "role": if msg.role == MessageRole::Assistant { "model" } else { "user" },
                "parts": [{"text": msg.content}]
            }));
        }

        let mut payload = serde_json::Map::new();
        payload.insert("contents".to_string(), json!(contents));

        if !system_parts.is_empty() {
            payload.insert(
                "systemInstruction".to_string(),
                json!({ "parts": system_parts }),
            );
        }
        payload
    }

    async fn generate_content(
        &self,
        payload: serde_json::Map<String, serde_json::Value>,
    ) -> super::Result<serde_json::Value> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            ProviderError::AuthenticationFailed(format!(
                "{} is not set",
                self.config.api_key_env
            ))
        })?;

        let url = format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        );

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("x-goog-api-key", api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::NetworkError(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();

            return Err(match status.as_u16() {
                400 | 404 => ProviderError::InvalidRequest(text),
                429 => ProviderError::RateLimitExceeded,
                401 | 403 => ProviderError::AuthenticationFailed(text),
                _ => ProviderError::ProviderUnavailable(format!(
                    "Gemini API error ({}): {}",
                    status, text
                )),
            });
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))
    }
}

/// Concatenated text of the first candidate
fn candidate_text(data: &serde_json::Value) -> super::Result<String> {
    let candidate = first_candidate(data)?;

    let parts = candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
        .ok_or_else(|| ProviderError::ParseError("No parts in candidate content".to_string()))?;

    Ok(parts
        .iter()
        .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
        .collect())
}

fn first_candidate(data: &serde_json::Value) -> super::Result<&serde_json::Value> {
    data.get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| ProviderError::ParseError("No candidates in response".to_string()))
}

fn total_tokens(data: &serde_json::Value) -> Option<u64> {
    data.get("usageMetadata")
        .and_then(|u| u.get("totalTokenCount"))
        .and_then(|t| t.as_u64())
}

/// Sources and search queries from the grounding metadata
fn grounding(data: &serde_json::Value) -> (Vec<Source>, Vec<String>) {
    let Some(metadata) = first_candidate(data)
        .ok()
        .and_then(|c| c.get("groundingMetadata"))
    else {
        return (Vec::new(), Vec::new());
    };

    let sources = metadata
        .get("groundingChunks")
        .and_then(|c| c.as_array())
        .map(|chunks| {
            chunks
                .iter()
                .filter_map(|chunk| {
                    let web = chunk.get("web")?;
                    let url = web.get("uri")?.as_str()?;
                    let title = web.get("title").and_then(|t| t.as_str()).unwrap_or(url);
                    Some(Source::new(title, url))
                })
                .collect()
        })
        .unwrap_or_default();

    let queries = metadata
        .get("webSearchQueries")
        .and_then(|q| q.as_array())
        .map(|q| {
            q.iter()
                .filter_map(|s| s.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    (sources, queries)
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::new()
            .with(Capability::TextGeneration)
            .with(Capability::WebSearch)
            .with(Capability::StructuredOutput)
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate_text(&self, messages: &[Message]) -> super::Result<TextGeneration> {
        let data = self.generate_content(Self::build_payload(messages)).await?;
        Ok(TextGeneration {
            text: candidate_text(&data)?,
            tokens_used: total_tokens(&data),
        })
    }

    async fn generate_with_search(&self, messages: &[Message]) -> super::Result<SearchGeneration> {
        let mut payload = Self::build_payload(messages);
        payload.insert("tools".to_string(), json!([{ "google_search": {} }]));

        let data = self.generate_content(payload).await?;
        let (sources, queries) = grounding(&data);

        Ok(SearchGeneration {
            text: candidate_text(&data)?,
            sources,
            queries,
            tokens_used: total_tokens(&data),
        })
    }

    async fn generate_structured(
        &self,
        messages: &[Message],
        schema: &serde_json::Value,
    ) -> super::Result<StructuredGeneration> {
        let mut messages = messages.to_vec();
        messages.push(Message::system(format!(
            "Respond with JSON only, shaped like:\n{}",
            schema
        )));

        let mut payload = Self::build_payload(&messages);
        payload.insert(
            "generationConfig".to_string(),
            json!({ "responseMimeType": "application/json" }),
        );

        let data = self.generate_content(payload).await?;
        let text = candidate_text(&data)?;
        let value = extract_json(&text).ok_or_else(|| {
            ProviderError::ParseError("Gemini did not return a JSON document".to_string())
        })?;

        Ok(StructuredGeneration {
            value,
            tokens_used: total_tokens(&data),
        })
    }
}
