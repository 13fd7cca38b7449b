//! Configuration management
//!
//! This module handles loading, validation, and management of the Strata
//! configuration. Configuration is stored in TOML format at
//! ~/.strata/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: log level
//! - **agent**: default `AgentConfig` for every execution
//! - **chain**: provider fallback tuning
//! - **parallel**: fan-out defaults for the research stage
//! - **workflow**: clarification and research thresholds
//! - **providers**: Ollama and Gemini backends
//!
//! # Examples
//!
//! ```no_run
//! use strata_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Log level: {}", config.core.log_level);
//! println!("Max clarification rounds: {}", config.workflow.max_clarification_rounds);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use sdk::AgentConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::llm::FallbackOptions;
use crate::orchestrator::ParallelOptions;
use crate::workflow::WorkflowOptions;

/// Main configuration structure
///
/// Every section has defaults, so an empty file is a valid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Core settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Default agent execution settings
    #[serde(default)]
    pub agent: AgentDefaults,

    /// Provider fallback settings
    #[serde(default)]
    pub chain: ChainConfig,

    /// Fan-out settings
    #[serde(default)]
    pub parallel: ParallelConfig,

    /// Workflow settings
    #[serde(default)]
    pub workflow: WorkflowConfig,

    /// Provider backends
    #[serde(default)]
    pub providers: ProvidersConfig,
}

/// Core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Defaults for [`AgentConfig`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefaults {
    /// Maximum fallback attempts after the primary provider fails
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Timeout for one agent attempt in milliseconds
    #[serde(default = "default_agent_timeout_ms")]
    pub timeout_ms: u64,

    /// Retry failed agents on the remaining providers
    #[serde(default = "default_true")]
    pub enable_fallback: bool,

    /// Provider to prefer when an agent does not ask for one
    #[serde(default)]
    pub preferred_provider: Option<String>,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            timeout_ms: default_agent_timeout_ms(),
            enable_fallback: true,
            preferred_provider: None,
        }
    }
}

/// Provider chain configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Maximum providers tried per operation (defaults to all)
    #[serde(default)]
    pub max_attempts: Option<usize>,

    /// Delay between fallback attempts in milliseconds
    #[serde(default)]
    pub retry_delay_ms: u64,
}

/// Parallel executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelConfig {
    /// Maximum concurrently running agents
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Stop on the first failure
    #[serde(default)]
    pub fail_fast: bool,

    /// Timeout for the whole batch in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Successful agents required for the batch to succeed
    #[serde(default)]
    pub min_successful: Option<usize>,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            fail_fast: false,
            timeout_ms: None,
            min_successful: None,
        }
    }
}

/// Workflow configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Clarification rounds before gap analysis is forced to proceed
    #[serde(default = "default_max_clarification_rounds")]
    pub max_clarification_rounds: u32,

    /// Research sub-agents below this confidence are reported as gaps
    #[serde(default = "default_confidence_threshold")]
    pub research_confidence_threshold: f64,

    /// Research sub-agents that must succeed for research to count
    #[serde(default = "default_research_min_successful")]
    pub research_min_successful: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_clarification_rounds: default_max_clarification_rounds(),
            research_confidence_threshold: default_confidence_threshold(),
            research_min_successful: default_research_min_successful(),
        }
    }
}

/// Provider backends
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Ollama provider settings
    #[serde(default)]
    pub ollama: OllamaConfig,

    /// Gemini provider settings
    #[serde(default)]
    pub gemini: GeminiConfig,
}

/// Ollama provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Register the provider
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Fallback priority (lower is tried first)
    #[serde(default = "default_ollama_priority")]
    pub priority: i32,

    /// Base URL for Ollama API
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_ollama_model")]
    pub model: String,
}

/// Gemini provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// Register the provider
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Fallback priority (lower is tried first)
    #[serde(default)]
    pub priority: i32,

    /// Base URL for Gemini API
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_gemini_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_gemini_api_key_env")]
    pub api_key_env: String,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    2
}

fn default_agent_timeout_ms() -> u64 {
    120_000
}

fn default_max_concurrency() -> usize {
    3
}

fn default_max_clarification_rounds() -> u32 {
    3
}

fn default_confidence_threshold() -> f64 {
    0.5
}

fn default_research_min_successful() -> usize {
    1
}

fn default_ollama_priority() -> i32 {
    10
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_gemini_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_gemini_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: default_ollama_priority(),
            base_url: default_ollama_base_url(),
            model: default_ollama_model(),
        }
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: 0,
            base_url: default_gemini_base_url(),
            model: default_gemini_model(),
            api_key_env: default_gemini_api_key_env(),
        }
    }
}

impl AgentDefaults {
    /// Agent configuration for a top-level request
    pub fn to_agent_config(&self) -> AgentConfig {
        AgentConfig {
            max_retries: self.max_retries,
            timeout_ms: self.timeout_ms,
            enable_fallback: self.enable_fallback,
            preferred_provider: self.preferred_provider.clone(),
            ..AgentConfig::default()
        }
    }
}

impl ChainConfig {
    pub fn to_fallback_options(&self) -> FallbackOptions {
        let mut options = FallbackOptions::default();
        options.max_attempts = self.max_attempts;
        if self.retry_delay_ms > 0 {
            options.retry_delay = Some(Duration::from_millis(self.retry_delay_ms));
        }
        options
    }
}

impl ParallelConfig {
    pub fn to_parallel_options(&self) -> ParallelOptions {
        ParallelOptions {
            max_concurrency: Some(self.max_concurrency),
            fail_fast: self.fail_fast,
            timeout: self.timeout_ms.map(Duration::from_millis),
            min_successful: self.min_successful,
            ..ParallelOptions::default()
        }
    }
}

impl WorkflowConfig {
    pub fn to_workflow_options(&self) -> WorkflowOptions {
        WorkflowOptions {
            max_clarification_rounds: Some(self.max_clarification_rounds),
            ..WorkflowOptions::default()
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.strata/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self, EngineError> {
        let config: Config = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let config = Self::default();
        config.validate()?;

        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.strata/config.toml)
    pub fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".strata").join("config.toml"))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.agent.timeout_ms == 0 {
            return Err(EngineError::Config(
                "agent.timeout_ms must be greater than 0".to_string(),
            ));
        }

        if let Some(preferred) = &self.agent.preferred_provider {
            let valid_providers = ["ollama", "gemini"];
            if !valid_providers.contains(&preferred.as_str()) {
                return Err(EngineError::Config(format!(
                    "Invalid preferred provider '{}'. Must be one of: {}",
                    preferred,
                    valid_providers.join(", ")
                )));
            }
        }

        if self.chain.max_attempts == Some(0) {
            return Err(EngineError::Config(
                "chain.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.parallel.max_concurrency == 0 {
            return Err(EngineError::Config(
                "parallel.max_concurrency must be at least 1".to_string(),
            ));
        }

        let threshold = self.workflow.research_confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(EngineError::Config(
                "research_confidence_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        Ok(())
    }
}
