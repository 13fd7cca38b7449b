//! Provider Abstraction Layer
//!
//! This module provides a common interface for interacting with multiple AI
//! backends (Ollama, Gemini, or anything implementing [`Provider`]). Providers
//! are opaque: the runtime only knows their name, capability flags and the
//! three generation entry points. The [`chain::ProviderChain`] orders them and
//! executes operations with sequential fallback.

use async_trait::async_trait;
use sdk::{Capability, CapabilitySet, EngineError};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod chain;
pub mod gemini;
pub mod ollama;

pub use chain::{FallbackOptions, FallbackSuccess, ProviderChain, ProviderStats};

/// Result type for provider operations
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Errors that can occur during provider operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Capability not supported: {0}")]
    Unsupported(Capability),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl ProviderError {
    /// Attach the provider name, producing the engine-level error
    pub fn into_engine(self, provider: &str) -> EngineError {
        EngineError::provider(provider, self.to_string())
    }
}

/// Message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Role of the message sender (user, assistant, system)
    pub role: MessageRole,

    /// Content of the message
    pub content: String,
}

impl Message {
    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

/// A web source cited by a search-grounded generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    pub url: String,
}

impl Source {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
        }
    }
}

/// Plain text generation output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextGeneration {
    pub text: String,
    #[serde(default)]
    pub tokens_used: Option<u64>,
}

/// Search-grounded generation output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchGeneration {
    pub text: String,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub queries: Vec<String>,
    #[serde(default)]
    pub tokens_used: Option<u64>,
}

/// Structured (JSON) generation output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredGeneration {
    pub value: serde_json::Value,
    #[serde(default)]
    pub tokens_used: Option<u64>,
}

/// Provider trait that all AI backends must implement
#[async_trait]
pub trait Provider: Send + Sync {
    /// Unique name of the provider (e.g., "ollama", "gemini")
    fn name(&self) -> &str;

    /// Capabilities this provider offers
    fn capabilities(&self) -> CapabilitySet;

    /// Whether the provider can currently be used (credentials present, etc.)
    /// Default implementation returns true.
    fn is_available(&self) -> bool {
        true
    }

    /// Generate free-form text
    async fn generate_text(&self, messages: &[Message]) -> Result<TextGeneration>;

    /// Generate text grounded on live web search
    ///
    /// Providers without [`Capability::WebSearch`] keep the default, which
    /// reports the capability as unsupported.
    async fn generate_with_search(&self, _messages: &[Message]) -> Result<SearchGeneration> {
        Err(ProviderError::Unsupported(Capability::WebSearch))
    }

    /// Generate a JSON value shaped like `schema`
    ///
    /// `schema` is a JSON example or JSON Schema document describing the
    /// expected shape; providers pass it on as best they can.
    async fn generate_structured(
        &self,
        messages: &[Message],
        schema: &serde_json::Value,
    ) -> Result<StructuredGeneration>;
}

/// Extract the first JSON value embedded in model output.
///
/// Handles multiple output formats:
/// 1. Raw JSON (object or array)
/// 2. Fenced JSON (with or without trailing text): ` ```json\n{...}\n``` `
/// 3. JSON embedded in prose, found by balanced-brace scanning
pub fn extract_json(content: &str) -> Option<serde_json::Value> {
    let trimmed = content.trim();

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if value.is_object() || value.is_array() {
            return Some(value);
        }
    }

    if let Some(inner) = extract_fenced_json(trimmed) {
        if let Ok(value) = serde_json::from_str(inner.trim()) {
            return Some(value);
        }
    }

    // Scan for the first opening bracket of either kind
    let start = trimmed.find(['{', '['])?;
    let candidate = &trimmed[start..];
    let json_str = extract_balanced_json(candidate)?;
    serde_json::from_str(json_str).ok()
}

/// Extract the body of the first markdown code fence in the text.
///
/// Works even when there is trailing prose after the closing ```.
/// Returns `None` if no fenced block is found.
fn extract_fenced_json(content: &str) -> Option<&str> {
    let fence_start = content.find("```")?;
    let after_opening = &content[fence_start + 3..];

    // Skip the language tag line (e.g. "json\n")
    let body_start_rel = after_opening.find('\n')? + 1;
    let body_start = fence_start + 3 + body_start_rel;

    let closing = content[body_start..].find("```")?;
    let body_end = body_start + closing;

    if body_start >= body_end {
        return None;
    }

    Some(&content[body_start..body_end])
}

/// Extract a balanced JSON object or array starting at position 0 of `s`.
///
/// Counts bracket depth, respecting string literals, to find the matching
/// close bracket.
fn extract_balanced_json(s: &str) -> Option<&str> {
    let (open, close) = match s.chars().next()? {
        '{' => ('{', '}'),
        '[' => ('[', ']'),
        _ => return None,
    };
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            c if c == open && !in_string => depth += 1,
            c if c == close && !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
