//! Agents
//!
//! An agent is a pluggable unit of work executed against the providers of an
//! [`ExecutionContext`]. [`Agent::execute`] wraps every implementation in the
//! same validation, timeout, cancellation and provider-fallback pipeline.

pub mod context;
pub mod core;
pub mod prompt;

pub use context::ExecutionContext;
pub use core::{run_agent, Agent, AgentPhase, DynAgent};
pub use prompt::{SearchAgent, StructuredAgent};
