//! Agent input/output types
//!
//! `AgentResult` is the structured value every agent execution resolves to,
//! whether it succeeded, failed validation, timed out or was cancelled.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Execution metadata attached to every agent result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetadata {
    /// Wall-clock duration of the execution in milliseconds
    pub execution_time_ms: u64,

    /// Provider that produced the data (if one was resolved)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_used: Option<String>,

    /// Tokens reported by the provider(s) during the execution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,

    /// Whether a fallback provider produced the data
    #[serde(default)]
    pub fallback_used: bool,
}

/// Outcome of one agent execution
///
/// Invariant: `success == false` implies `data` is `None` and `error` is `Some`.
/// Fields are private so the invariant can only be built through
/// [`AgentResult::ok`] and [`AgentResult::failure`]; it is serialized for
/// output but never deserialized.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResult<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    warnings: Vec<String>,
    metadata: AgentMetadata,
}

impl<T> AgentResult<T> {
    /// Create a successful result
    pub fn ok(data: T, metadata: AgentMetadata) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            warnings: Vec::new(),
            metadata,
        }
    }

    /// Create a failed result
    pub fn failure(error: impl Into<String>, metadata: AgentMetadata) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            warnings: Vec::new(),
            metadata,
        }
    }

    /// Attach warnings
    pub fn with_warnings(mut self, warnings: impl IntoIterator<Item = String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    /// Append a single warning
    pub fn push_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn metadata(&self) -> &AgentMetadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut AgentMetadata {
        &mut self.metadata
    }

    /// Consume the result, returning the data on success or the error message
    pub fn into_result(self) -> Result<T, String> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            _ => Err(self
                .error
                .unwrap_or_else(|| "Agent produced no data".to_string())),
        }
    }

    /// Split into data and warnings
    pub fn into_parts(self) -> (Option<T>, Option<String>, Vec<String>, AgentMetadata) {
        (self.data, self.error, self.warnings, self.metadata)
    }
}

/// Per-execution agent configuration
///
/// Immutable during one execution. Derived contexts produce modified copies
/// through [`AgentConfig::with_overrides`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Maximum number of fallback attempts after the primary provider fails
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Timeout for a single `execute_core` attempt
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Retry on the remaining providers when the primary attempt fails
    #[serde(default = "default_true")]
    pub enable_fallback: bool,

    /// Provider to resolve when the agent does not ask for one by name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_provider: Option<String>,

    /// Free-form agent settings
    #[serde(default)]
    pub custom_settings: HashMap<String, serde_json::Value>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            timeout_ms: default_timeout_ms(),
            enable_fallback: true,
            preferred_provider: None,
            custom_settings: HashMap::new(),
        }
    }
}

/// Partial configuration applied on top of a parent config
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub max_retries: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub enable_fallback: Option<bool>,
    pub preferred_provider: Option<String>,
    pub custom_settings: HashMap<String, serde_json::Value>,
}

impl AgentConfig {
    /// Return a copy with the given overrides applied
    ///
    /// Custom settings are merged key by key, the override winning.
    pub fn with_overrides(&self, overrides: &ConfigOverrides) -> Self {
        let mut custom_settings = self.custom_settings.clone();
        custom_settings.extend(
            overrides
                .custom_settings
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        Self {
            max_retries: overrides.max_retries.unwrap_or(self.max_retries),
            timeout_ms: overrides.timeout_ms.unwrap_or(self.timeout_ms),
            enable_fallback: overrides.enable_fallback.unwrap_or(self.enable_fallback),
            preferred_provider: overrides
                .preferred_provider
                .clone()
                .or_else(|| self.preferred_provider.clone()),
            custom_settings,
        }
    }

    /// Read a typed custom setting
    pub fn setting<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.custom_settings
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Outcome of `Agent::validate_input`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Validation {
    errors: Vec<String>,
}

impl Validation {
    pub fn valid() -> Self {
        Self::default()
    }

    /// Record an error when `condition` is false
    pub fn require(mut self, condition: bool, error: impl Into<String>) -> Self {
        if !condition {
            self.errors.push(error.into());
        }
        self
    }

    pub fn push(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<String> {
        self.errors
    }
}

fn default_max_retries() -> u32 {
    2
}

fn default_timeout_ms() -> u64 {
    120_000
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_has_no_data() {
        let result: AgentResult<String> = AgentResult::failure("boom", AgentMetadata::default());
        assert!(!result.is_success());
        assert!(result.data().is_none());
        assert_eq!(result.error(), Some("boom"));
    }

    #[test]
    fn test_failure_serializes_without_data() {
        let failed: AgentResult<i32> = AgentResult::failure("nope", AgentMetadata::default());
        let value = serde_json::to_value(&failed).unwrap();

        assert_eq!(value["success"], serde_json::json!(false));
        assert_eq!(value["error"], serde_json::json!("nope"));
        assert!(value.get("data").is_none());
        assert_eq!(value["warnings"], serde_json::json!([]));
    }

    #[test]
    fn test_into_result() {
        let ok = AgentResult::ok(7, AgentMetadata::default());
        assert_eq!(ok.into_result(), Ok(7));

        let failed: AgentResult<i32> = AgentResult::failure("nope", AgentMetadata::default());
        assert_eq!(failed.into_result(), Err("nope".to_string()));
    }

    #[test]
    fn test_config_overrides_merge() {
        let mut base = AgentConfig::default();
        base.custom_settings
            .insert("depth".to_string(), serde_json::json!(2));
        base.preferred_provider = Some("ollama".to_string());

        let mut overrides = ConfigOverrides {
            timeout_ms: Some(500),
            ..Default::default()
        };
        overrides
            .custom_settings
            .insert("tone".to_string(), serde_json::json!("formal"));

        let merged = base.with_overrides(&overrides);
        assert_eq!(merged.timeout_ms, 500);
        assert_eq!(merged.max_retries, base.max_retries);
        assert_eq!(merged.preferred_provider.as_deref(), Some("ollama"));
        assert_eq!(merged.setting::<u32>("depth"), Some(2));
        assert_eq!(merged.setting::<String>("tone").as_deref(), Some("formal"));
    }

    #[test]
    fn test_validation_collects_errors() {
        let validation = Validation::valid()
            .require(true, "never recorded")
            .require(false, "a is required")
            .require(false, "b is required");
        assert!(!validation.is_valid());
        assert_eq!(validation.errors().len(), 2);
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let result = AgentResult::ok(
            "x".to_string(),
            AgentMetadata {
                execution_time_ms: 12,
                provider_used: Some("gemini".to_string()),
                tokens_used: None,
                fallback_used: false,
            },
        );
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains(r#""executionTimeMs":12"#));
        assert!(json.contains(r#""providerUsed":"gemini""#));
        assert!(!json.contains("tokensUsed"));
    }
}
