//! Strata Engine Library
//!
//! This library provides the agent runtime behind the `strata` binary:
//! provider fallback, agent execution, parallel orchestration and the
//! resumable market requirements workflow. It is used by both the main
//! binary and integration tests.

/// Configuration management module
pub mod config;

/// Message bus for progress events
pub mod message_bus;

/// AI provider abstraction and fallback chain
pub mod llm;

/// Agent execution core module
pub mod agent;

/// Parallel and sequential agent orchestration
pub mod orchestrator;

/// Resumable multi-stage workflow
pub mod workflow;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
