//! Provider Chain
//!
//! Priority-ordered registry of providers with enable/availability flags and
//! a sequential fallback executor. Lower priority values are tried first;
//! ties keep registration order.
//!
//! Fallback is strictly sequential: a logical operation is never sent to two
//! providers at the same time.

use super::Provider;
use sdk::{CapabilitySet, EngineError};
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// Callback invoked when the chain moves from a failed provider to the next
pub type FallbackHook = Arc<dyn Fn(&str, &str, &EngineError) + Send + Sync>;

/// A registered provider with its scheduling metadata
struct ProviderEntry {
    provider: Arc<dyn Provider>,
    priority: i32,
    enabled: bool,
    /// Monotonic registration sequence used to break priority ties
    seq: u64,
}

#[derive(Default)]
struct Registry {
    entries: Vec<ProviderEntry>,
    next_seq: u64,
}

/// Per-provider status snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderStats {
    pub name: String,
    pub available: bool,
    pub enabled: bool,
    pub priority: i32,
    pub capabilities: CapabilitySet,
}

/// Options for [`ProviderChain::execute_with_fallback`]
#[derive(Clone, Default)]
pub struct FallbackOptions {
    /// Maximum providers to try (defaults to the chain length)
    pub max_attempts: Option<usize>,

    /// Pause between a failure and the next attempt
    pub retry_delay: Option<Duration>,

    /// Called as `(from, to, error)` before moving to the next provider
    pub on_fallback: Option<FallbackHook>,
}

impl FallbackOptions {
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    pub fn on_fallback(
        mut self,
        hook: impl Fn(&str, &str, &EngineError) + Send + Sync + 'static,
    ) -> Self {
        self.on_fallback = Some(Arc::new(hook));
        self
    }
}

/// Successful outcome of a fallback execution
#[derive(Debug, Clone)]
pub struct FallbackSuccess<T> {
    pub value: T,
    /// Name of the provider that succeeded
    pub provider: String,
    /// Number of providers invoked, including the successful one
    pub attempts: usize,
}

/// Priority-ordered provider registry
///
/// Constructed once and shared as `Arc<ProviderChain>`; the interior lock is
/// never held across an await point.
#[derive(Default)]
pub struct ProviderChain {
    registry: RwLock<Registry>,
}

impl ProviderChain {
    /// Create an empty chain
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a provider
    ///
    /// Idempotent by name: registering a name again replaces the previous
    /// entry, and the replacement counts as the latest registration.
    pub fn register(&self, provider: Arc<dyn Provider>, priority: i32, enabled: bool) {
        let mut registry = self.write();
        let name = provider.name().to_string();
        registry.entries.retain(|e| e.provider.name() != name);

        let seq = registry.next_seq;
        registry.next_seq += 1;
        registry.entries.push(ProviderEntry {
            provider,
            priority,
            enabled,
            seq,
        });

        tracing::debug!("Registered provider {} (priority {})", name, priority);
    }

    /// Remove a provider; returns whether it was registered
    pub fn unregister(&self, name: &str) -> bool {
        let mut registry = self.write();
        let before = registry.entries.len();
        registry.entries.retain(|e| e.provider.name() != name);
        registry.entries.len() != before
    }

    /// Look up a registered provider by name, regardless of flags
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.read()
            .entries
            .iter()
            .find(|e| e.provider.name() == name)
            .map(|e| Arc::clone(&e.provider))
    }

    /// Whether `name` is registered, enabled and currently available
    pub fn is_usable(&self, name: &str) -> bool {
        self.read()
            .entries
            .iter()
            .any(|e| e.provider.name() == name && e.enabled && e.provider.is_available())
    }

    /// Enabled and available providers, ascending by priority then registration
    pub fn available_providers(&self) -> Vec<Arc<dyn Provider>> {
        let registry = self.read();
        let mut usable: Vec<&ProviderEntry> = registry
            .entries
            .iter()
            .filter(|e| e.enabled && e.provider.is_available())
            .collect();
        usable.sort_by_key(|e| (e.priority, e.seq));
        usable.into_iter().map(|e| Arc::clone(&e.provider)).collect()
    }

    /// Names of the available providers in fallback order
    pub fn names(&self) -> Vec<String> {
        self.available_providers()
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    /// First provider in fallback order
    pub fn default_provider(&self) -> Option<Arc<dyn Provider>> {
        self.available_providers().into_iter().next()
    }

    /// Number of registered providers (including disabled ones)
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enable or disable a provider. Unknown names are ignored.
    pub fn set_enabled(&self, name: &str, enabled: bool) {
        if let Some(entry) = self
            .write()
            .entries
            .iter_mut()
            .find(|e| e.provider.name() == name)
        {
            entry.enabled = enabled;
        }
    }

    /// Change a provider's priority. Unknown names are ignored.
    pub fn set_priority(&self, name: &str, priority: i32) {
        if let Some(entry) = self
            .write()
            .entries
            .iter_mut()
            .find(|e| e.provider.name() == name)
        {
            entry.priority = priority;
        }
    }

    /// Status of every registered provider, in fallback order
    pub fn stats(&self) -> Vec<ProviderStats> {
        let registry = self.read();
        let mut entries: Vec<&ProviderEntry> = registry.entries.iter().collect();
        entries.sort_by_key(|e| (e.priority, e.seq));
        entries
            .into_iter()
            .map(|e| ProviderStats {
                name: e.provider.name().to_string(),
                available: e.provider.is_available(),
                enabled: e.enabled,
                priority: e.priority,
                capabilities: e.provider.capabilities(),
            })
            .collect()
    }

    /// Run `op` against the available providers in order until one succeeds
    ///
    /// On each failure that still has a next candidate, `on_fallback` is
    /// invoked and `retry_delay` is awaited. After `max_attempts` failures the
    /// call fails with [`EngineError::AllProvidersFailed`] listing every
    /// provider message.
    pub async fn execute_with_fallback<T, F, Fut>(
        &self,
        mut op: F,
        options: &FallbackOptions,
    ) -> Result<FallbackSuccess<T>, EngineError>
    where
        F: FnMut(Arc<dyn Provider>) -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let providers = self.available_providers();
        if providers.is_empty() {
            return Err(EngineError::NoProviderAvailable);
        }

        let max_attempts = options
            .max_attempts
            .unwrap_or(providers.len())
            .clamp(1, providers.len());
        let mut failures: Vec<String> = Vec::new();

        for (index, provider) in providers.iter().take(max_attempts).enumerate() {
            let name = provider.name().to_string();
            tracing::debug!("Attempting provider: {} ({}/{})", name, index + 1, max_attempts);

            match op(Arc::clone(provider)).await {
                Ok(value) => {
                    tracing::info!("Provider {} succeeded", name);
                    return Ok(FallbackSuccess {
                        value,
                        provider: name,
                        attempts: index + 1,
                    });
                }
                Err(e) => {
                    tracing::warn!("Provider {} failed: {}", name, e);
                    failures.push(format!("{}: {}", name, e));

                    let next = providers.get(index + 1).filter(|_| index + 1 < max_attempts);
                    if let Some(next) = next {
                        if let Some(hook) = &options.on_fallback {
                            hook(&name, next.name(), &e);
                        }
                        if let Some(delay) = options.retry_delay {
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }

        tracing::error!("All providers exhausted after {} attempts", failures.len());
        Err(EngineError::AllProvidersFailed(failures.join("; ")))
    }
}
