//! Bounded-concurrency fan-out
//!
//! [`ParallelExecutor`] runs N agents over N inputs on the current task:
//! every agent is a pending future in one `FuturesUnordered`, so nothing is
//! spawned. With a concurrency limit below N, a semaphore keeps at most
//! `max_concurrency` agents past admission at any time.

use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use sdk::errors::EngineError;
use sdk::{AgentMetadata, AgentResult};
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::agent::{DynAgent, ExecutionContext};
use crate::message_bus::Event;

/// `(completed, total, agent_id)`
pub type ProgressHook = Arc<dyn Fn(usize, usize, &str) + Send + Sync>;

/// `(agent_id, error)`
pub type ErrorHook = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Options for one batch
#[derive(Clone, Default)]
pub struct ParallelOptions {
    /// Agents admitted at once; `None` (or a value ≥ N) runs all together
    pub max_concurrency: Option<usize>,

    /// Stop on the first failed agent
    pub fail_fast: bool,

    /// Deadline for the whole batch
    pub timeout: Option<Duration>,

    /// Successful agents required for the batch to succeed
    pub min_successful: Option<usize>,

    pub on_progress: Option<ProgressHook>,

    pub on_error: Option<ErrorHook>,
}

impl ParallelOptions {
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_min_successful(mut self, min: usize) -> Self {
        self.min_successful = Some(min);
        self
    }

    pub fn on_progress(mut self, hook: impl Fn(usize, usize, &str) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(hook));
        self
    }

    pub fn on_error(mut self, hook: impl Fn(&str, &str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for ParallelOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelOptions")
            .field("max_concurrency", &self.max_concurrency)
            .field("fail_fast", &self.fail_fast)
            .field("timeout", &self.timeout)
            .field("min_successful", &self.min_successful)
            .finish()
    }
}

/// Aggregated outcome of a batch. `results` follow input order.
#[derive(Debug)]
pub struct ParallelResult<O> {
    pub success: bool,
    pub results: Vec<AgentResult<O>>,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

impl<O> ParallelResult<O> {
    fn rejected(error: String, total: usize) -> Self {
        Self {
            success: false,
            results: Vec::new(),
            total,
            successful: 0,
            failed: 0,
            error: Some(error),
            execution_time_ms: 0,
        }
    }
}

/// Why the collection loop stopped early
enum Interrupt {
    FailFast { agent_id: String, error: String },
    TimedOut(Duration),
}

pub struct ParallelExecutor {
    options: ParallelOptions,
}

impl ParallelExecutor {
    pub fn new(options: ParallelOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ParallelOptions {
        &self.options
    }

    /// Run `agents[i]` on `inputs[i]` for every i
    pub async fn execute<I, O>(
        &self,
        agents: &[DynAgent<I, O>],
        inputs: &[I],
        ctx: &ExecutionContext,
    ) -> ParallelResult<O>
    where
        I: Send + Sync,
        O: Send,
    {
        let start = Instant::now();
        let total = agents.len();

        if total == 0 {
            return ParallelResult::rejected("No agents to execute".to_string(), 0);
        }
        if total != inputs.len() {
            return ParallelResult::rejected(
                format!(
                    "Agent and input counts differ ({} agents, {} inputs)",
                    total,
                    inputs.len()
                ),
                total,
            );
        }

        let window = self.options.max_concurrency.filter(|&limit| limit < total);
        let semaphore = window.map(|limit| Semaphore::new(limit.max(1)));
        let halt = CancellationToken::new();

        tracing::debug!(
            "Executing {} agents (window: {:?}, fail_fast: {})",
            total,
            window,
            self.options.fail_fast
        );

        let mut pending = FuturesUnordered::new();
        for (index, (agent, input)) in agents.iter().zip(inputs).enumerate() {
            let semaphore = semaphore.as_ref();
            let halt = &halt;

            pending.push(async move {
                let _permit = match semaphore {
                    Some(semaphore) => tokio::select! {
                        biased;
                        _ = halt.cancelled() => return (index, None),
                        permit = semaphore.acquire() => match permit {
                            Ok(permit) => Some(permit),
                            Err(_) => return (index, None),
                        },
                    },
                    None => None,
                };

                if halt.is_cancelled() {
                    return (index, None);
                }

                (index, Some(settle(agent.as_ref(), input, ctx).await))
            });
        }

        let mut slots: Vec<Option<AgentResult<O>>> = (0..total).map(|_| None).collect();
        let mut completed = 0usize;

        let collect = async {
            while let Some((index, outcome)) = pending.next().await {
                let Some(result) = outcome else {
                    continue;
                };
                let agent_id = agents[index].id();
                completed += 1;

                if let Some(hook) = &self.options.on_progress {
                    hook(completed, total, agent_id);
                }
                ctx.emit(Event::BatchProgress {
                    completed,
                    total,
                    agent_id: agent_id.to_string(),
                })
                .await;

                let failure = result.error().map(str::to_string);
                slots[index] = Some(result);

                if let Some(error) = failure {
                    tracing::warn!("Agent {} failed in batch: {}", agent_id, error);
                    if let Some(hook) = &self.options.on_error {
                        hook(agent_id, &error);
                    }

                    if self.options.fail_fast {
                        halt.cancel();
                        if window.is_none() {
                            return Some(Interrupt::FailFast {
                                agent_id: agent_id.to_string(),
                                error,
                            });
                        }
                    }
                }
            }
            None
        };

        let interrupt = match self.options.timeout {
            Some(limit) => match tokio::time::timeout(limit, collect).await {
                Ok(interrupt) => interrupt,
                Err(_) => Some(Interrupt::TimedOut(limit)),
            },
            None => collect.await,
        };
        drop(pending);

        let first_failure = agents.iter().zip(&slots).find_map(|(agent, slot)| {
            slot.as_ref()
                .and_then(|r| r.error())
                .map(|e| (agent.id().to_string(), e.to_string()))
        });

        let results: Vec<AgentResult<O>> = slots
            .into_iter()
            .zip(agents)
            .map(|(slot, agent)| {
                slot.unwrap_or_else(|| {
                    let err = match &interrupt {
                        Some(Interrupt::TimedOut(limit)) => EngineError::Timeout {
                            agent: agent.id().to_string(),
                            timeout_ms: duration_ms(*limit),
                        },
                        _ => EngineError::Cancelled(format!(
                            "agent {} was stopped before completing",
                            agent.id()
                        )),
                    };
                    AgentResult::failure(err.to_string(), AgentMetadata::default())
                })
            })
            .collect();

        let successful = results.iter().filter(|r| r.is_success()).count();
        let failed = total - successful;

        let (success, error) = match interrupt {
            Some(Interrupt::TimedOut(limit)) => (
                false,
                Some(format!(
                    "Batch timed out after {}ms ({} of {} agents finished)",
                    duration_ms(limit),
                    completed,
                    total
                )),
            ),
            Some(Interrupt::FailFast { agent_id, error }) => (
                false,
                Some(format!("Batch aborted after {} failed: {}", agent_id, error)),
            ),
            None if self.options.fail_fast && failed > 0 => {
                let (agent_id, error) = first_failure.unwrap_or_default();
                (
                    false,
                    Some(format!("Batch stopped after {} failed: {}", agent_id, error)),
                )
            }
            None => match self.options.min_successful {
                Some(min) if successful < min => (
                    false,
                    Some(format!(
                        "Only {} of {} agents succeeded ({} required)",
                        successful, total, min
                    )),
                ),
                _ if successful == 0 => {
                    let detail = first_failure
                        .map(|(agent_id, error)| format!(": {} failed with {}", agent_id, error))
                        .unwrap_or_default();
                    (false, Some(format!("All {} agents failed{}", total, detail)))
                }
                _ => (true, None),
            },
        };

        let execution_time_ms = duration_ms(start.elapsed());
        tracing::info!(
            "Batch finished: {}/{} succeeded in {}ms",
            successful,
            total,
            execution_time_ms
        );

        ParallelResult {
            success,
            results,
            total,
            successful,
            failed,
            error,
            execution_time_ms,
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Execute one agent, turning a panic into a failed result
pub(crate) async fn settle<I, O>(
    agent: &dyn crate::agent::Agent<Input = I, Output = O>,
    input: &I,
    ctx: &ExecutionContext,
) -> AgentResult<O>
where
    I: Send + Sync,
    O: Send,
{
    match AssertUnwindSafe(agent.execute(input, ctx)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = format!("Agent {} panicked: {}", agent.id(), panic_message(&*panic));
            tracing::error!("{}", message);
            AgentResult::failure(message, AgentMetadata::default())
        }
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::llm::ProviderChain;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Sleeps, then succeeds with its input unless told to fail
    struct Worker {
        id: String,
        delay: Duration,
        fail: bool,
    }

    fn worker(id: &str, delay_ms: u64, fail: bool) -> DynAgent<u32, u32> {
        Arc::new(Worker {
            id: id.to_string(),
            delay: Duration::from_millis(delay_ms),
            fail,
        })
    }

    #[async_trait]
    impl Agent for Worker {
        type Input = u32;
        type Output = u32;

        fn id(&self) -> &str {
            &self.id
        }

        async fn execute_core(&self, input: &u32, _ctx: &ExecutionContext) -> Result<u32, EngineError> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                Err(EngineError::Agent(format!("{} broke", self.id)))
            } else {
                Ok(*input * 10)
            }
        }
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(Arc::new(ProviderChain::new()))
    }

    #[tokio::test]
    async fn test_mismatched_lengths_rejected() {
        let executor = ParallelExecutor::new(ParallelOptions::default());
        let result = executor
            .execute(&[worker("a", 0, false), worker("b", 0, false)], &[1], &ctx())
            .await;

        assert!(!result.success);
        assert!(result.results.is_empty());
        assert_eq!(result.total, 2);
        assert!(result.error.unwrap().contains("2 agents, 1 inputs"));
    }

    #[tokio::test]
    async fn test_empty_batch_rejected() {
        let executor = ParallelExecutor::new(ParallelOptions::default());
        let result = executor.execute::<u32, u32>(&[], &[], &ctx()).await;
        assert!(!result.success);
        assert_eq!(result.total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_all_keeps_input_order() {
        let progress = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&progress);
        let options = ParallelOptions::default()
            .on_progress(move |done, total, id| recorded.lock().unwrap().push((done, total, id.to_string())));

        let executor = ParallelExecutor::new(options);
        let agents = vec![worker("slow", 30, false), worker("bad", 10, true), worker("fast", 1, false)];
        let result = executor.execute(&agents, &[1, 2, 3], &ctx()).await;

        assert!(result.success);
        assert_eq!((result.total, result.successful, result.failed), (3, 2, 1));
        assert_eq!(result.results[0].data(), Some(&10));
        assert_eq!(result.results[1].error(), Some("bad broke"));
        assert_eq!(result.results[2].data(), Some(&30));

        let progress = progress.lock().unwrap();
        assert_eq!(
            *progress,
            vec![
                (1, 3, "fast".to_string()),
                (2, 3, "bad".to_string()),
                (3, 3, "slow".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_min_successful_unmet() {
        let executor = ParallelExecutor::new(ParallelOptions::default().with_min_successful(2));
        let agents = vec![worker("ok", 0, false), worker("bad", 0, true)];
        let result = executor.execute(&agents, &[1, 2], &ctx()).await;

        assert!(!result.success);
        assert_eq!(result.successful, 1);
        assert_eq!(result.error.as_deref(), Some("Only 1 of 2 agents succeeded (2 required)"));
    }

    #[tokio::test]
    async fn test_all_failed_is_failure() {
        let errors = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&errors);
        let executor = ParallelExecutor::new(
            ParallelOptions::default().on_error(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let agents = vec![worker("a", 0, true), worker("b", 0, true)];
        let result = executor.execute(&agents, &[1, 2], &ctx()).await;

        assert!(!result.success);
        assert_eq!(result.failed, 2);
        assert_eq!(errors.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_fail_fast_drops_remaining() {
        let executor = ParallelExecutor::new(ParallelOptions::default().with_fail_fast(true));
        let agents = vec![worker("slow", 100, false), worker("bad", 1, true)];
        let result = executor.execute(&agents, &[1, 2], &ctx()).await;

        assert!(!result.success);
        assert_eq!(result.failed, 2);
        assert!(result.results[0].error().unwrap().starts_with("Cancelled:"));
        assert_eq!(result.results[1].error(), Some("bad broke"));
        assert!(result.error.unwrap().contains("bad"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_fail_fast_finishes_in_flight() {
        let executor = ParallelExecutor::new(
            ParallelOptions::default()
                .with_max_concurrency(2)
                .with_fail_fast(true),
        );
        let agents = vec![
            worker("bad", 1, true),
            worker("inflight", 50, false),
            worker("queued", 1, false),
        ];
        let result = executor.execute(&agents, &[1, 2, 3], &ctx()).await;

        assert!(!result.success);
        assert_eq!(result.results[1].data(), Some(&20));
        assert!(result.results[2].error().unwrap().starts_with("Cancelled:"));
        assert_eq!((result.successful, result.failed), (1, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_timeout_keeps_finished_results() {
        let executor =
            ParallelExecutor::new(ParallelOptions::default().with_timeout(Duration::from_millis(20)));
        let agents = vec![worker("quick", 5, false), worker("stuck", 10_000, false)];
        let result = executor.execute(&agents, &[1, 2], &ctx()).await;

        assert!(!result.success);
        assert_eq!(result.results[0].data(), Some(&10));
        assert_eq!(
            result.results[1].error(),
            Some("Agent stuck timed out after 20ms")
        );
        assert!(result.error.unwrap().starts_with("Batch timed out"));
    }

    #[tokio::test]
    async fn test_cancelled_request_fails_every_agent() {
        let ctx = ctx();
        ctx.cancel();
        let executor = ParallelExecutor::new(ParallelOptions::default().with_max_concurrency(1));
        let agents = vec![worker("a", 0, false), worker("b", 0, false), worker("c", 0, false)];
        let result = executor.execute(&agents, &[1, 2, 3], &ctx).await;

        assert!(!result.success);
        assert_eq!(result.failed, result.total);
        assert!(result
            .results
            .iter()
            .all(|r| r.error().unwrap().starts_with("Cancelled:")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_flight_settles_pending_as_cancelled() {
        let ctx = ctx();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            canceller.cancel();
        });

        let executor = ParallelExecutor::new(ParallelOptions::default());
        let agents = vec![
            worker("s0", 10_000, false),
            worker("s1", 10_000, false),
            worker("s2", 10_000, false),
        ];
        let result = executor.execute(&agents, &[1, 2, 3], &ctx).await;

        assert!(!result.success);
        assert_eq!((result.failed, result.total), (3, 3));
        for (result, id) in result.results.iter().zip(["s0", "s1", "s2"]) {
            assert_eq!(
                result.error(),
                Some(format!("Cancelled: agent {} was cancelled", id).as_str())
            );
        }
    }

    struct Panicker;

    #[async_trait]
    impl Agent for Panicker {
        type Input = u32;
        type Output = u32;

        fn id(&self) -> &str {
            "panicker"
        }

        async fn execute_core(&self, _input: &u32, _ctx: &ExecutionContext) -> Result<u32, EngineError> {
            panic!("exploded");
        }
    }

    #[tokio::test]
    async fn test_panic_becomes_failed_result() {
        let executor = ParallelExecutor::new(ParallelOptions::default());
        let agents: Vec<DynAgent<u32, u32>> = vec![Arc::new(Panicker), worker("ok", 0, false)];
        let result = executor.execute(&agents, &[1, 2], &ctx()).await;

        assert!(result.success);
        assert_eq!(result.results[0].error(), Some("Agent panicker panicked: exploded"));
        assert_eq!(result.successful, 1);
    }
}
