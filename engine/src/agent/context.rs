//! Execution Context
//!
//! One [`ExecutionContext`] is created per top-level request and handed to
//! every agent that works on it. It resolves providers, carries the shared
//! key/value state, emits events and propagates cancellation.
//!
//! Cloning is cheap and shares everything by reference. Derived contexts
//! come in two flavours:
//!
//! - [`ExecutionContext::create_child_context`] for nested agents: same
//!   request, providers, bus and cancellation token, but a snapshot of the
//!   state and possibly overridden config.
//! - [`ExecutionContext::with_provider`] for a single attempt pinned to one
//!   provider (used by fallback).

use sdk::errors::EngineError;
use sdk::{AgentConfig, ConfigOverrides};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::llm::{FallbackOptions, Provider, ProviderChain};
use crate::message_bus::{Event, MessageBus};

type SharedState = Arc<RwLock<HashMap<String, Value>>>;

/// Per-request execution handle
#[derive(Clone)]
pub struct ExecutionContext {
    request_id: String,
    trace_id: String,
    parent_agent_id: Option<String>,
    state: SharedState,
    config: Arc<AgentConfig>,
    providers: Arc<ProviderChain>,
    provider_override: Option<Arc<dyn Provider>>,
    /// Pacing and attempt limits for agent-level fallback
    fallback: FallbackOptions,
    bus: Option<Arc<MessageBus>>,
    cancel: CancellationToken,
    /// Tokens recorded across the whole request
    request_usage: Arc<AtomicU64>,
    /// Tokens recorded by the current attempt
    attempt_usage: Arc<AtomicU64>,
}

impl ExecutionContext {
    /// Create a top-level context with default config and fresh ids
    pub fn new(providers: Arc<ProviderChain>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            trace_id: Uuid::new_v4().to_string(),
            parent_agent_id: None,
            state: Arc::new(RwLock::new(HashMap::new())),
            config: Arc::new(AgentConfig::default()),
            providers,
            provider_override: None,
            fallback: FallbackOptions::default(),
            bus: None,
            cancel: CancellationToken::new(),
            request_usage: Arc::new(AtomicU64::new(0)),
            attempt_usage: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn with_fallback_options(mut self, options: FallbackOptions) -> Self {
        self.fallback = options;
        self
    }

    pub fn with_bus(mut self, bus: Arc<MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Use an externally owned cancellation token (e.g. wired to Ctrl-C)
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn parent_agent_id(&self) -> Option<&str> {
        self.parent_agent_id.as_deref()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn fallback_options(&self) -> &FallbackOptions {
        &self.fallback
    }

    pub fn providers(&self) -> &Arc<ProviderChain> {
        &self.providers
    }

    pub fn bus(&self) -> Option<&Arc<MessageBus>> {
        self.bus.as_ref()
    }

    /// Resolve a provider
    ///
    /// Order: explicit name, then the provider this context is bound to,
    /// then the configured preferred provider (if usable), then the first
    /// available provider of the chain.
    pub fn get_provider(&self, name: Option<&str>) -> Result<Arc<dyn Provider>, EngineError> {
        if let Some(name) = name {
            return self
                .providers
                .get(name)
                .ok_or_else(|| EngineError::NotFound(name.to_string()));
        }

        if let Some(provider) = &self.provider_override {
            return Ok(Arc::clone(provider));
        }

        if let Some(preferred) = &self.config.preferred_provider {
            if self.providers.is_usable(preferred) {
                if let Some(provider) = self.providers.get(preferred) {
                    return Ok(provider);
                }
            }
            tracing::debug!("Preferred provider {} is not usable", preferred);
        }

        self.providers
            .default_provider()
            .ok_or(EngineError::NoProviderAvailable)
    }

    /// All available providers, in fallback order
    pub fn get_fallback_chain(&self) -> Vec<Arc<dyn Provider>> {
        self.providers.available_providers()
    }

    /// Derive a context for a nested agent
    ///
    /// The state is copied, so writes in the child are not visible to the
    /// parent. Cancelling either context cancels both.
    pub fn create_child_context(
        &self,
        parent_agent_id: impl Into<String>,
        overrides: &ConfigOverrides,
    ) -> Self {
        let snapshot = self.state_snapshot();

        Self {
            parent_agent_id: Some(parent_agent_id.into()),
            state: Arc::new(RwLock::new(snapshot)),
            config: Arc::new(self.config.with_overrides(overrides)),
            attempt_usage: Arc::new(AtomicU64::new(0)),
            ..self.clone()
        }
    }

    /// A context bound to `provider` for one attempt
    pub fn with_provider(&self, provider: Arc<dyn Provider>) -> Self {
        Self {
            provider_override: Some(provider),
            ..self.for_attempt()
        }
    }

    /// A context sharing everything but the attempt token counter
    pub fn for_attempt(&self) -> Self {
        Self {
            attempt_usage: Arc::new(AtomicU64::new(0)),
            ..self.clone()
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, HashMap<String, Value>> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, HashMap<String, Value>> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state_get(&self, key: &str) -> Option<Value> {
        self.read_state().get(key).cloned()
    }

    pub fn state_set(&self, key: impl Into<String>, value: Value) {
        self.write_state().insert(key.into(), value);
    }

    pub fn state_remove(&self, key: &str) -> Option<Value> {
        self.write_state().remove(key)
    }

    pub fn state_snapshot(&self) -> HashMap<String, Value> {
        self.read_state().clone()
    }

    /// Publish an event if a bus is attached
    pub async fn emit(&self, event: Event) {
        if let Some(bus) = &self.bus {
            bus.publish(event).await;
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel the whole request
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Record provider token usage
    pub fn record_tokens(&self, tokens: u64) {
        self.attempt_usage.fetch_add(tokens, Ordering::Relaxed);
        self.request_usage.fetch_add(tokens, Ordering::Relaxed);
    }

    /// Tokens recorded by this attempt, if any
    pub fn attempt_tokens(&self) -> Option<u64> {
        match self.attempt_usage.load(Ordering::Relaxed) {
            0 => None,
            n => Some(n),
        }
    }

    /// Tokens recorded across the whole request
    pub fn total_tokens(&self) -> u64 {
        self.request_usage.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("request_id", &self.request_id)
            .field("trace_id", &self.trace_id)
            .field("parent_agent_id", &self.parent_agent_id)
            .field(
                "provider_override",
                &self.provider_override.as_ref().map(|p| p.name().to_string()),
            )
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
