//! Error types and handling
//!
//! This module provides the error types used throughout the Strata runtime.
//! All errors implement the `ErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.
//!
//! Messages are flat strings: no provider-internal objects or backtraces are
//! carried across the agent boundary.

use thiserror::Error;

/// Trait for Strata error extensions
///
/// Provides additional context for errors, including user-friendly hints and
/// recoverability information. All engine errors implement this trait.
pub trait ErrorExt {
    /// Returns a user-friendly hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried (for example against another
    /// provider). Non-recoverable errors end the current call.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Validation**: agent input rejected before any work happens
/// - **Provider**: a single backend failed, fallback may still succeed
/// - **AllProvidersFailed**: the whole chain was exhausted
/// - **Timeout / Cancelled**: the execution race was lost
/// - **Orchestration**: sub-agents failed below the success threshold
/// - **Workflow**: the pipeline reached its ERROR stage
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, ErrorExt};
///
/// let error = EngineError::Provider {
///     provider: "ollama".to_string(),
///     message: "connection refused".to_string(),
/// };
/// assert!(error.is_recoverable());
///
/// let fatal = EngineError::AllProvidersFailed("ollama: connection refused".to_string());
/// assert!(!fatal.is_recoverable());
/// ```
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Agent input errors
    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    // Provider registry errors
    #[error("Provider not found: {0}")]
    NotFound(String),

    #[error("No provider available")]
    NoProviderAvailable,

    // Provider execution errors
    #[error("Provider {provider} failed: {message}")]
    Provider { provider: String, message: String },

    #[error("All providers failed: {0}")]
    AllProvidersFailed(String),

    // Execution race errors
    #[error("Agent {agent} timed out after {timeout_ms}ms")]
    Timeout { agent: String, timeout_ms: u64 },

    #[error("Cancelled: {0}")]
    Cancelled(String),

    // Composition errors
    #[error("Orchestration failed: {0}")]
    Orchestration(String),

    #[error("Workflow error: {0}")]
    Workflow(String),

    #[error("Invalid workflow state: {0}")]
    StateCorrupt(String),

    // Agent-specific failure raised from execute_core
    #[error("{0}")]
    Agent(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(String),
}

impl EngineError {
    /// Shorthand for a provider failure
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Whether this error was produced by the cancellation signal
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::StateCorrupt(err.to_string())
    }
}

impl ErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",
            Self::Validation(_) => "The request is incomplete. Fix the listed fields and retry",
            Self::NotFound(_) => "The requested provider is not registered",
            Self::NoProviderAvailable => "No AI provider is available. Check configuration and API keys",
            Self::Provider { .. } => "AI provider unavailable. Check your API keys and network",
            Self::AllProvidersFailed(_) => "Every configured AI provider failed. Try again later",
            Self::Timeout { .. } => "The AI provider took too long to respond. Try again",
            Self::Cancelled(_) => "The request was cancelled",
            Self::Orchestration(_) => "Too many sub-tasks failed to produce a result",
            Self::Workflow(_) => "The pipeline stopped. Review the reason and start again",
            Self::StateCorrupt(_) => "The saved workflow state could not be read",
            Self::Agent(_) => "The agent could not complete its task",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Non-recoverable errors
            Self::Config(_)
            | Self::Validation(_)
            | Self::NoProviderAvailable
            | Self::AllProvidersFailed(_)
            | Self::Cancelled(_)
            | Self::Workflow(_)
            | Self::StateCorrupt(_) => false,

            // All other errors may succeed on another provider or retry
            _ => true,
        }
    }
}
