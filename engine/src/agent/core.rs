//! Agent Core
//!
//! The [`Agent`] trait is the unit of work. Implementors provide validation,
//! the capabilities they expect from a provider, and `execute_core`; the
//! provided [`Agent::execute`] wraps every run in the same pipeline:
//!
//! 1. Fail immediately if the request is already cancelled
//! 2. Validate input (invalid input never reaches `execute_core`)
//! 3. Compare required capabilities with the resolved provider (warning only)
//! 4. Race `execute_core` against the timeout and the cancellation token
//! 5. On failure, retry on the remaining providers when fallback is enabled
//!
//! Errors never escape: every outcome is an [`AgentResult`].

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::{AgentMetadata, AgentResult, CapabilitySet, Validation};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn, Instrument};

use super::ExecutionContext;
use crate::llm::Provider;
use crate::message_bus::Event;

/// A pluggable unit of work
#[async_trait]
pub trait Agent: Send + Sync {
    type Input: Send + Sync;
    type Output: Send;

    /// Stable identifier used in logs, events and error messages
    fn id(&self) -> &str;

    /// Capabilities the agent expects from its provider
    fn required_capabilities(&self) -> CapabilitySet {
        CapabilitySet::new()
    }

    fn validate_input(&self, _input: &Self::Input) -> Validation {
        Validation::valid()
    }

    /// The agent's own logic. Resolve the provider with
    /// `ctx.get_provider(None)` so fallback attempts are honoured.
    async fn execute_core(
        &self,
        input: &Self::Input,
        ctx: &ExecutionContext,
    ) -> Result<Self::Output, EngineError>;

    /// Run the agent through validation, timeout, cancellation and fallback
    async fn execute(
        &self,
        input: &Self::Input,
        ctx: &ExecutionContext,
    ) -> AgentResult<Self::Output> {
        run_agent(self, input, ctx).await
    }
}

/// Shared agent handle, as stored by orchestrators and the workflow
pub type DynAgent<I, O> = Arc<dyn Agent<Input = I, Output = O>>;

/// Per-invocation lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentPhase {
    Idle,
    Validating,
    CapabilityCheck,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for AgentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentPhase::Idle => "idle",
            AgentPhase::Validating => "validating",
            AgentPhase::CapabilityCheck => "capability-check",
            AgentPhase::Running => "running",
            AgentPhase::Completed => "completed",
            AgentPhase::Failed => "failed",
            AgentPhase::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

struct PhaseTracker {
    phase: AgentPhase,
}

impl PhaseTracker {
    fn new() -> Self {
        Self {
            phase: AgentPhase::Idle,
        }
    }

    fn enter(&mut self, next: AgentPhase) {
        debug!("phase {} -> {}", self.phase, next);
        self.phase = next;
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// One attempt of `execute_core`, raced against timeout and cancellation
async fn run_attempt<A>(
    agent: &A,
    input: &A::Input,
    ctx: &ExecutionContext,
) -> Result<A::Output, EngineError>
where
    A: Agent + ?Sized,
{
    let timeout_ms = ctx.config().timeout_ms;

    tokio::select! {
        biased;
        _ = ctx.cancellation().cancelled() => {
            Err(EngineError::Cancelled(format!("agent {} was cancelled", agent.id())))
        }
        outcome = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            agent.execute_core(input, ctx),
        ) => match outcome {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout {
                agent: agent.id().to_string(),
                timeout_ms,
            }),
        }
    }
}

/// The pipeline behind [`Agent::execute`]
pub async fn run_agent<A>(
    agent: &A,
    input: &A::Input,
    ctx: &ExecutionContext,
) -> AgentResult<A::Output>
where
    A: Agent + ?Sized,
{
    let span = info_span!(
        "agent",
        agent_id = %agent.id(),
        request_id = %ctx.request_id(),
        trace_id = %ctx.trace_id(),
    );

    async move {
        let start = Instant::now();
        let mut phase = PhaseTracker::new();

        if ctx.is_cancelled() {
            phase.enter(AgentPhase::Cancelled);
            let err = EngineError::Cancelled(format!("agent {} cancelled before start", agent.id()));
            return AgentResult::failure(
                err.to_string(),
                AgentMetadata {
                    execution_time_ms: elapsed_ms(start),
                    ..AgentMetadata::default()
                },
            );
        }

        phase.enter(AgentPhase::Validating);
        let validation = agent.validate_input(input);
        if !validation.is_valid() {
            phase.enter(AgentPhase::Failed);
            let err = EngineError::Validation(validation.into_errors());
            warn!("{}", err);
            return AgentResult::failure(
                err.to_string(),
                AgentMetadata {
                    execution_time_ms: elapsed_ms(start),
                    ..AgentMetadata::default()
                },
            );
        }

        phase.enter(AgentPhase::CapabilityCheck);
        let mut warnings = Vec::new();
        let primary = ctx.get_provider(None).ok();
        if let Some(provider) = &primary {
            let missing = provider
                .capabilities()
                .missing(&agent.required_capabilities());
            if !missing.is_empty() {
                let missing: CapabilitySet = missing.into_iter().collect();
                let message = format!(
                    "Provider {} lacks capabilities {} required by {}",
                    provider.name(),
                    missing,
                    agent.id()
                );
                warn!("{}", message);
                warnings.push(message);
            }
        }

        phase.enter(AgentPhase::Running);
        ctx.emit(Event::AgentStarted {
            agent_id: agent.id().to_string(),
            request_id: ctx.request_id().to_string(),
        })
        .await;

        let attempt_ctx = match &primary {
            Some(provider) => ctx.with_provider(Arc::clone(provider)),
            None => ctx.for_attempt(),
        };
        let primary_name = primary.as_ref().map(|p| p.name().to_string());

        let result = match run_attempt(agent, input, &attempt_ctx).await {
            Ok(data) => {
                phase.enter(AgentPhase::Completed);
                info!("Agent {} completed in {}ms", agent.id(), elapsed_ms(start));
                AgentResult::ok(
                    data,
                    AgentMetadata {
                        execution_time_ms: elapsed_ms(start),
                        provider_used: primary_name,
                        tokens_used: attempt_ctx.attempt_tokens(),
                        fallback_used: false,
                    },
                )
                .with_warnings(warnings)
            }
            Err(err) => {
                let retry = ctx.config().enable_fallback && !err.is_cancellation();
                let fallback = if retry {
                    run_fallback(agent, input, ctx, primary_name.as_deref(), &err).await
                } else {
                    None
                };

                match fallback {
                    Some(Ok((data, provider, attempt_ctx))) => {
                        phase.enter(AgentPhase::Completed);
                        warnings.push(format!(
                            "Primary provider {} failed ({}); used fallback provider {}",
                            primary_name.as_deref().unwrap_or("none"),
                            err,
                            provider
                        ));
                        AgentResult::ok(
                            data,
                            AgentMetadata {
                                execution_time_ms: elapsed_ms(start),
                                provider_used: Some(provider),
                                tokens_used: attempt_ctx.attempt_tokens(),
                                fallback_used: true,
                            },
                        )
                        .with_warnings(warnings)
                    }
                    Some(Err(cancelled)) => {
                        phase.enter(AgentPhase::Cancelled);
                        AgentResult::failure(
                            cancelled.to_string(),
                            AgentMetadata {
                                execution_time_ms: elapsed_ms(start),
                                provider_used: primary_name,
                                ..AgentMetadata::default()
                            },
                        )
                        .with_warnings(warnings)
                    }
                    None => {
                        phase.enter(if err.is_cancellation() {
                            AgentPhase::Cancelled
                        } else {
                            AgentPhase::Failed
                        });
                        warn!("Agent {} failed: {}", agent.id(), err);
                        AgentResult::failure(
                            err.to_string(),
                            AgentMetadata {
                                execution_time_ms: elapsed_ms(start),
                                provider_used: primary_name,
                                ..AgentMetadata::default()
                            },
                        )
                        .with_warnings(warnings)
                    }
                }
            }
        };

        ctx.emit(Event::AgentCompleted {
            agent_id: agent.id().to_string(),
            request_id: ctx.request_id().to_string(),
            success: result.is_success(),
            execution_time_ms: result.metadata().execution_time_ms,
        })
        .await;

        result
    }
    .instrument(span)
    .await
}

type FallbackOutcome<O> = Result<(O, String, ExecutionContext), EngineError>;

/// Retry on the remaining providers
///
/// Honours the context's [`FallbackOptions`](crate::llm::FallbackOptions):
/// at most `max_attempts` providers in total, `retry_delay` between
/// attempts, and the `on_fallback` hook before each switch.
///
/// Returns `None` when every candidate failed (or none exists), and
/// `Some(Err(_))` only when cancellation interrupted the retries.
async fn run_fallback<A>(
    agent: &A,
    input: &A::Input,
    ctx: &ExecutionContext,
    tried: Option<&str>,
    original: &EngineError,
) -> Option<FallbackOutcome<A::Output>>
where
    A: Agent + ?Sized,
{
    let options = ctx.fallback_options();

    // `max_attempts` counts the primary attempt as well
    let mut budget = ctx.config().max_retries as usize;
    if let Some(max_attempts) = options.max_attempts {
        budget = budget.min(max_attempts.saturating_sub(1));
    }

    let candidates: Vec<Arc<dyn Provider>> = ctx
        .get_fallback_chain()
        .into_iter()
        .filter(|p| Some(p.name()) != tried)
        .take(budget)
        .collect();

    let mut previous = tried.unwrap_or("none").to_string();
    let mut last_error = original.clone();

    for provider in candidates {
        let name = provider.name().to_string();
        warn!(
            "Agent {} falling back from {} to {}: {}",
            agent.id(),
            previous,
            name,
            last_error
        );
        if let Some(hook) = &options.on_fallback {
            hook(&previous, &name, &last_error);
        }
        if let Some(delay) = options.retry_delay {
            tokio::select! {
                biased;
                _ = ctx.cancellation().cancelled() => {
                    return Some(Err(EngineError::Cancelled(format!(
                        "agent {} was cancelled",
                        agent.id()
                    ))));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
        ctx.emit(Event::ProviderFallback {
            from: previous.clone(),
            to: name.clone(),
            error: last_error.to_string(),
        })
        .await;

        let attempt_ctx = ctx.with_provider(provider);
        match run_attempt(agent, input, &attempt_ctx).await {
            Ok(data) => {
                info!("Agent {} recovered on provider {}", agent.id(), name);
                return Some(Ok((data, name, attempt_ctx)));
            }
            Err(err) if err.is_cancellation() => return Some(Err(err)),
            Err(err) => {
                last_error = err;
                previous = name;
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{FallbackOptions, Message, ProviderChain, StructuredGeneration, TextGeneration};
    use crate::message_bus::{EventType, MessageBus};
    use sdk::{AgentConfig, Capability};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Stub {
        name: String,
        capabilities: CapabilitySet,
    }

    #[async_trait]
    impl Provider for Stub {
        fn name(&self) -> &str {
            &self.name
        }

        fn capabilities(&self) -> CapabilitySet {
            self.capabilities.clone()
        }

        async fn generate_text(&self, _messages: &[Message]) -> crate::llm::Result<TextGeneration> {
            Ok(TextGeneration {
                text: self.name.clone(),
                tokens_used: Some(7),
            })
        }

        async fn generate_structured(
            &self,
            _messages: &[Message],
            _schema: &serde_json::Value,
        ) -> crate::llm::Result<StructuredGeneration> {
            Ok(StructuredGeneration {
                value: serde_json::Value::Null,
                tokens_used: None,
            })
        }
    }

    fn chain(names: &[&str]) -> Arc<ProviderChain> {
        let chain = ProviderChain::new();
        for (i, name) in names.iter().enumerate() {
            chain.register(
                Arc::new(Stub {
                    name: name.to_string(),
                    capabilities: CapabilitySet::new().with(Capability::TextGeneration),
                }),
                i as i32,
                true,
            );
        }
        Arc::new(chain)
    }

    /// Echoes its provider's text; fails on the listed providers
    struct EchoAgent {
        failing: Vec<&'static str>,
        calls: AtomicUsize,
        seen: Mutex<Vec<String>>,
    }

    impl EchoAgent {
        fn failing_on(failing: Vec<&'static str>) -> Self {
            Self {
                failing,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Agent for EchoAgent {
        type Input = String;
        type Output = String;

        fn id(&self) -> &str {
            "echo"
        }

        fn required_capabilities(&self) -> CapabilitySet {
            CapabilitySet::new().with(Capability::TextGeneration)
        }

        fn validate_input(&self, input: &String) -> Validation {
            Validation::valid().require(!input.is_empty(), "input must not be empty")
        }

        async fn execute_core(
            &self,
            input: &String,
            ctx: &ExecutionContext,
        ) -> Result<String, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let provider = ctx.get_provider(None)?;
            self.seen.lock().unwrap().push(provider.name().to_string());

            if self.failing.contains(&provider.name()) {
                return Err(EngineError::provider(provider.name(), "boom"));
            }

            let out = provider
                .generate_text(&[Message::user(input.clone())])
                .await
                .map_err(|e| e.into_engine(provider.name()))?;
            if let Some(tokens) = out.tokens_used {
                ctx.record_tokens(tokens);
            }
            Ok(format!("{}:{}", out.text, input))
        }
    }

    #[tokio::test]
    async fn test_success_reports_provider_and_tokens() {
        let ctx = ExecutionContext::new(chain(&["p1", "p2"]));
        let agent = EchoAgent::failing_on(vec![]);

        let result = agent.execute(&"hi".to_string(), &ctx).await;

        assert!(result.is_success());
        assert_eq!(result.data().map(String::as_str), Some("p1:hi"));
        assert_eq!(result.metadata().provider_used.as_deref(), Some("p1"));
        assert_eq!(result.metadata().tokens_used, Some(7));
        assert!(!result.metadata().fallback_used);
        assert!(result.warnings().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_input_never_runs_core() {
        let ctx = ExecutionContext::new(chain(&["p1"]));
        let agent = EchoAgent::failing_on(vec![]);

        let result = agent.execute(&String::new(), &ctx).await;

        assert!(!result.is_success());
        assert!(result.data().is_none());
        assert_eq!(
            result.error(),
            Some("Validation failed: input must not be empty")
        );
        assert_eq!(agent.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fallback_to_next_provider() {
        let ctx = ExecutionContext::new(chain(&["p1", "p2", "p3"]));
        let agent = EchoAgent::failing_on(vec!["p1", "p2"]);

        let result = agent.execute(&"hi".to_string(), &ctx).await;

        assert!(result.is_success());
        assert_eq!(result.data().map(String::as_str), Some("p3:hi"));
        assert_eq!(result.metadata().provider_used.as_deref(), Some("p3"));
        assert!(result.metadata().fallback_used);
        assert_eq!(result.warnings().len(), 1);
        assert!(result.warnings()[0].contains("fallback provider p3"));
        assert_eq!(*agent.seen.lock().unwrap(), vec!["p1", "p2", "p3"]);
    }

    #[tokio::test]
    async fn test_max_retries_caps_fallback() {
        let ctx = ExecutionContext::new(chain(&["p1", "p2", "p3"])).with_config(AgentConfig {
            max_retries: 1,
            ..AgentConfig::default()
        });
        let agent = EchoAgent::failing_on(vec!["p1", "p2"]);

        let result = agent.execute(&"hi".to_string(), &ctx).await;

        assert!(!result.is_success());
        assert_eq!(result.error(), Some("Provider p1 failed: boom"));
        assert_eq!(agent.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fallback_disabled_returns_original_failure() {
        let ctx = ExecutionContext::new(chain(&["p1", "p2"])).with_config(AgentConfig {
            enable_fallback: false,
            ..AgentConfig::default()
        });
        let agent = EchoAgent::failing_on(vec!["p1"]);

        let result = agent.execute(&"hi".to_string(), &ctx).await;

        assert!(!result.is_success());
        assert_eq!(result.metadata().provider_used.as_deref(), Some("p1"));
        assert_eq!(agent.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_capability_mismatch_is_a_warning() {
        let providers = ProviderChain::new();
        providers.register(
            Arc::new(Stub {
                name: "bare".into(),
                capabilities: CapabilitySet::new(),
            }),
            0,
            true,
        );
        let ctx = ExecutionContext::new(Arc::new(providers));
        let agent = EchoAgent::failing_on(vec![]);

        let result = agent.execute(&"hi".to_string(), &ctx).await;

        assert!(result.is_success());
        assert_eq!(
            result.warnings(),
            ["Provider bare lacks capabilities [text_generation] required by echo"]
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let ctx = ExecutionContext::new(chain(&["p1"]));
        ctx.cancel();
        let agent = EchoAgent::failing_on(vec![]);

        let result = agent.execute(&"hi".to_string(), &ctx).await;

        assert!(!result.is_success());
        assert!(result.error().unwrap().starts_with("Cancelled:"));
        assert_eq!(agent.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_waits_configured_delay() {
        let ctx = ExecutionContext::new(chain(&["p1", "p2"])).with_fallback_options(
            FallbackOptions::default().with_retry_delay(Duration::from_millis(500)),
        );
        let agent = EchoAgent::failing_on(vec!["p1"]);

        let start = tokio::time::Instant::now();
        let result = agent.execute(&"hi".to_string(), &ctx).await;

        assert_eq!(result.metadata().provider_used.as_deref(), Some("p2"));
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_fallback_respects_max_attempts() {
        let switches: Arc<Mutex<Vec<(String, String)>>> = Arc::default();
        let seen = Arc::clone(&switches);
        let options = FallbackOptions::default()
            .with_max_attempts(2)
            .on_fallback(move |from, to, _err| {
                seen.lock().unwrap().push((from.to_string(), to.to_string()));
            });
        let ctx = ExecutionContext::new(chain(&["p1", "p2", "p3"])).with_fallback_options(options);
        let agent = EchoAgent::failing_on(vec!["p1", "p2"]);

        let result = agent.execute(&"hi".to_string(), &ctx).await;

        assert!(!result.is_success());
        assert_eq!(*agent.seen.lock().unwrap(), vec!["p1", "p2"]);
        assert_eq!(
            *switches.lock().unwrap(),
            vec![("p1".to_string(), "p2".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_retry_delay() {
        let ctx = ExecutionContext::new(chain(&["p1", "p2"])).with_fallback_options(
            FallbackOptions::default().with_retry_delay(Duration::from_secs(60)),
        );
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });
        let agent = EchoAgent::failing_on(vec!["p1"]);

        let result = agent.execute(&"hi".to_string(), &ctx).await;

        assert_eq!(result.error(), Some("Cancelled: agent echo was cancelled"));
        assert_eq!(*agent.seen.lock().unwrap(), vec!["p1"]);
    }

    struct SlowAgent;

    #[async_trait]
    impl Agent for SlowAgent {
        type Input = ();
        type Output = ();

        fn id(&self) -> &str {
            "slow"
        }

        async fn execute_core(&self, _input: &(), _ctx: &ExecutionContext) -> Result<(), EngineError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_produces_failure() {
        let ctx = ExecutionContext::new(chain(&["p1"])).with_config(AgentConfig {
            timeout_ms: 50,
            enable_fallback: false,
            ..AgentConfig::default()
        });

        let result = SlowAgent.execute(&(), &ctx).await;

        assert_eq!(result.error(), Some("Agent slow timed out after 50ms"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_running_agent() {
        let ctx = ExecutionContext::new(chain(&["p1", "p2"]));
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let result = SlowAgent.execute(&(), &ctx).await;

        assert!(!result.is_success());
        assert_eq!(result.error(), Some("Cancelled: agent slow was cancelled"));
    }

    #[tokio::test]
    async fn test_events_emitted() {
        let bus = Arc::new(MessageBus::new());
        let mut rx = bus.subscribe(EventType::All).await;
        let ctx = ExecutionContext::new(chain(&["p1", "p2"])).with_bus(bus);
        let agent = EchoAgent::failing_on(vec!["p1"]);

        agent.execute(&"hi".to_string(), &ctx).await;

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.event_type());
        }
        assert_eq!(
            kinds,
            vec![
                EventType::AgentStarted,
                EventType::ProviderFallback,
                EventType::AgentCompleted
            ]
        );
    }
}
