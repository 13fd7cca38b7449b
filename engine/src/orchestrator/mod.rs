//! Agent composition
//!
//! Two patterns: fan-out over independent agents ([`execute_parallel`],
//! [`ParallelExecutor`]) and a sequential pipe where each agent's output is
//! the next agent's input ([`execute_sequence`]). [`ResearchOrchestrator`]
//! combines fan-out with a deterministic merge.

pub mod parallel;
pub mod research;

pub use parallel::{ParallelExecutor, ParallelOptions, ParallelResult};
pub use research::{ResearchData, ResearchFindings, ResearchOrchestrator, ResearchSection};

use futures::future::join_all;
use sdk::{AgentMetadata, AgentResult};
use std::time::Instant;

use crate::agent::{DynAgent, ExecutionContext};

/// Run every agent concurrently and settle all of them
///
/// Returns exactly one result per agent; an agent without a matching input
/// gets a failed result.
pub async fn execute_parallel<I, O>(
    agents: &[DynAgent<I, O>],
    inputs: &[I],
    ctx: &ExecutionContext,
) -> Vec<AgentResult<O>>
where
    I: Send + Sync,
    O: Send,
{
    join_all(agents.iter().enumerate().map(|(index, agent)| async move {
        match inputs.get(index) {
            Some(input) => parallel::settle(agent.as_ref(), input, ctx).await,
            None => AgentResult::failure(
                format!("No input provided for agent {}", agent.id()),
                AgentMetadata::default(),
            ),
        }
    }))
    .await
}

/// Pipe `initial` through the agents in order
///
/// Stops at the first failure, whose error is prefixed with the failing
/// agent's id. Warnings from every executed agent are kept.
pub async fn execute_sequence<T>(
    agents: &[DynAgent<T, T>],
    initial: T,
    ctx: &ExecutionContext,
) -> AgentResult<T>
where
    T: Send + Sync,
{
    let start = Instant::now();
    let mut current = initial;
    let mut warnings = Vec::new();
    let mut metadata = AgentMetadata::default();

    for agent in agents {
        let result = parallel::settle(agent.as_ref(), &current, ctx).await;
        let (data, error, step_warnings, step) = result.into_parts();
        warnings.extend(step_warnings);

        metadata.provider_used = step.provider_used.or(metadata.provider_used);
        metadata.fallback_used |= step.fallback_used;
        if let Some(tokens) = step.tokens_used {
            metadata.tokens_used = Some(metadata.tokens_used.unwrap_or(0) + tokens);
        }

        match (data, error) {
            (Some(next), None) => current = next,
            (_, error) => {
                metadata.execution_time_ms = elapsed_ms(start);
                let message = format!(
                    "{}: {}",
                    agent.id(),
                    error.unwrap_or_else(|| "produced no output".to_string())
                );
                tracing::warn!("Sequence stopped at {}", message);
                return AgentResult::failure(message, metadata).with_warnings(warnings);
            }
        }
    }

    metadata.execution_time_ms = elapsed_ms(start);
    AgentResult::ok(current, metadata).with_warnings(warnings)
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
