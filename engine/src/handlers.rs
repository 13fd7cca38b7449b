//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - run: Start a workflow for a new product request
//! - resume: Continue a paused workflow with clarification answers
//! - providers: Show the provider chain, optionally probing it
//! - config: Show, validate or locate the configuration

use anyhow::{Context, Result};
use sdk::ErrorExt;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::agent::ExecutionContext;
use crate::cli::ConfigAction;
use crate::config::Config;
use crate::llm::gemini::GeminiProvider;
use crate::llm::ollama::OllamaProvider;
use crate::llm::{Message, ProviderChain};
use crate::message_bus::{Event, EventType, MessageBus};
use crate::workflow::{
    default_agents, ClarificationAnswer, Stage, WorkflowEngine, WorkflowInput, WorkflowResponse,
};

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Register the configured providers
pub fn build_provider_chain(config: &Config) -> Arc<ProviderChain> {
    let chain = ProviderChain::new();

    let ollama = &config.providers.ollama;
    chain.register(
        Arc::new(OllamaProvider::new(ollama.base_url.clone(), ollama.model.clone())),
        ollama.priority,
        ollama.enabled,
    );

    let gemini = &config.providers.gemini;
    chain.register(
        Arc::new(GeminiProvider::new(gemini.clone())),
        gemini.priority,
        gemini.enabled,
    );

    Arc::new(chain)
}

/// Root execution context for one CLI request
pub fn build_context(
    config: &Config,
    providers: Arc<ProviderChain>,
    bus: Arc<MessageBus>,
    cancel: CancellationToken,
) -> ExecutionContext {
    ExecutionContext::new(providers)
        .with_config(config.agent.to_agent_config())
        .with_fallback_options(config.chain.to_fallback_options())
        .with_bus(bus)
        .with_cancellation(cancel)
}

/// Cancel `token` on Ctrl-C
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling workflow");
            token.cancel();
        }
    });
}

/// Print workflow progress to stderr as it happens
async fn report_progress(bus: &MessageBus) {
    let mut events = bus.subscribe(EventType::All).await;
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                Event::StageChanged { to, .. } => eprintln!("→ {}", to),
                Event::ProviderFallback { from, to, error } => {
                    eprintln!("  {} failed ({}), falling back to {}", from, error, to)
                }
                Event::BatchProgress {
                    completed,
                    total,
                    agent_id,
                } => eprintln!("  [{}/{}] {}", completed, total, agent_id),
                _ => {}
            }
        }
    });
}

async fn run_workflow(
    input: WorkflowInput,
    config: &Config,
    format: OutputFormat,
) -> Result<WorkflowResponse> {
    let providers = build_provider_chain(config);
    if providers.available_providers().is_empty() {
        anyhow::bail!(
            "No AI providers available. Enable Ollama or set {} in the environment",
            config.providers.gemini.api_key_env
        );
    }

    let bus = Arc::new(MessageBus::new());
    if matches!(format, OutputFormat::Text) {
        report_progress(&bus).await;
    }

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let ctx = build_context(config, providers, bus, cancel);
    let engine = WorkflowEngine::new(
        default_agents(config),
        config.workflow.to_workflow_options(),
    );

    tracing::info!(request_id = %ctx.request_id(), "Running workflow");
    let response = engine.run(input, &ctx).await;
    tracing::info!(
        stage = %response.stage,
        tokens = ctx.total_tokens(),
        "Workflow returned"
    );
    Ok(response)
}

/// Start a new workflow
pub async fn handle_run(
    concept: String,
    market: String,
    details: Option<String>,
    state_out: Option<PathBuf>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let input = WorkflowInput::Fresh {
        product_concept: concept,
        target_market: market,
        additional_details: details,
    };

    let response = run_workflow(input, config, format).await?;
    finish(&response, state_out.as_deref(), format)
}

/// Resume a paused workflow
pub async fn handle_resume(
    state: PathBuf,
    answers: Option<PathBuf>,
    state_out: Option<PathBuf>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let existing_state = std::fs::read_to_string(&state)
        .with_context(|| format!("Failed to read state file {}", state.display()))?;

    let clarification_answers = match &answers {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read answers file {}", path.display()))?;
            Some(parse_answers(&contents)?)
        }
        None => None,
    };

    let input = WorkflowInput::Resume {
        existing_state,
        clarification_answers,
    };

    let response = run_workflow(input, config, format).await?;
    let state_out = state_out.unwrap_or(state);
    finish(&response, Some(&state_out), format)
}

/// Parse an answers file
///
/// Accepts either `[{"field": .., "answer": ..}]` or `{"field": "answer"}`.
pub fn parse_answers(contents: &str) -> Result<Vec<ClarificationAnswer>> {
    if let Ok(list) = serde_json::from_str::<Vec<ClarificationAnswer>>(contents) {
        return Ok(list);
    }

    let map: BTreeMap<String, String> = serde_json::from_str(contents)
        .context("Answers must be a JSON list of {field, answer} or an object of field: answer")?;

    Ok(map
        .into_iter()
        .map(|(field, answer)| ClarificationAnswer { field, answer })
        .collect())
}

/// Persist state, print the response and map ERROR to a failing exit
fn finish(response: &WorkflowResponse, state_out: Option<&Path>, format: OutputFormat) -> Result<()> {
    if let Some(path) = state_out {
        std::fs::write(path, &response.state)
            .with_context(|| format!("Failed to write state file {}", path.display()))?;
        tracing::debug!("State written to {}", path.display());
    }

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(response)?);
        }
        OutputFormat::Text => print_response(response, state_out),
    }

    if response.stage == Stage::Error {
        anyhow::bail!(
            "Workflow failed: {}",
            response.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn print_response(response: &WorkflowResponse, state_out: Option<&Path>) {
    println!("Stage: {}", response.stage);

    if let Some(questions) = response.questions.as_ref().filter(|_| response.needs_clarification) {
        println!();
        println!("Clarification needed:");
        for q in &questions.questions {
            println!("  {}. {} [{}]", q.number, q.question, q.field);
            if !q.context.is_empty() {
                println!("     {}", q.context);
            }
            if let Some(options) = &q.options {
                println!("     Options: {}", options.join(" | "));
            }
        }
        println!();
        match state_out {
            Some(path) => println!(
                "Answer with: strata resume --state {} --answers <answers.json>",
                path.display()
            ),
            None => println!("Re-run with --state-out to be able to resume."),
        }
    }

    if let Some(mrd) = &response.mrd {
        println!();
        println!("# {}", mrd.title);
        if !mrd.executive_summary.is_empty() {
            println!();
            println!("{}", mrd.executive_summary);
        }
        for section in &mrd.sections {
            println!();
            println!("## {}", section.heading);
            println!("{}", section.body);
        }
    }

    if let Some(sources) = response.sources.as_ref().filter(|s| !s.is_empty()) {
        println!();
        println!("Sources:");
        for (i, source) in sources.iter().enumerate() {
            println!("  {}. {} <{}>", i + 1, source.title, source.url);
        }
    }

    if !response.warnings.is_empty() {
        println!();
        println!("⚠ Warnings:");
        for warning in &response.warnings {
            println!("  - {}", warning);
        }
    }

    if let Some(error) = &response.error {
        println!();
        println!("✗ {}", error);
    }
}

/// Show the provider chain in fallback order
pub async fn handle_providers(probe: bool, config: &Config, format: OutputFormat) -> Result<()> {
    let chain = build_provider_chain(config);
    let stats = chain.stats();

    let probe_result = if probe {
        let messages = [Message::user("Reply with the single word: ok")];
        let outcome = chain
            .execute_with_fallback(
                |provider| {
                    let messages = messages.clone();
                    async move {
                        provider
                            .generate_text(&messages)
                            .await
                            .map_err(|e| e.into_engine(provider.name()))
                    }
                },
                &config.chain.to_fallback_options(),
            )
            .await;
        Some(outcome)
    } else {
        None
    };

    match format {
        OutputFormat::Text => {
            println!("Providers (fallback order):");
            for s in &stats {
                let status = match (s.enabled, s.available) {
                    (false, _) => "disabled",
                    (true, false) => "unavailable",
                    (true, true) => "available",
                };
                println!(
                    "  {:<10} {:<12} priority {:<4} {}",
                    s.name, status, s.priority, s.capabilities
                );
            }

            match &probe_result {
                Some(Ok(success)) => println!(
                    "\n✓ Probe answered by {} after {} attempt(s)",
                    success.provider, success.attempts
                ),
                Some(Err(e)) => {
                    println!("\n✗ Probe failed: {}", e);
                    println!("  {}", e.user_hint());
                }
                None => {}
            }
        }
        OutputFormat::Json => {
            let probe = probe_result.as_ref().map(|outcome| match outcome {
                Ok(success) => json!({
                    "success": true,
                    "provider": success.provider,
                    "attempts": success.attempts,
                }),
                Err(e) => json!({
                    "success": false,
                    "error": e.to_string(),
                    "hint": e.user_hint(),
                }),
            });
            let output = json!({
                "providers": stats,
                "probe": probe,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    if let Some(Err(e)) = probe_result {
        return Err(e).context("Provider probe failed");
    }
    Ok(())
}

/// Configuration management
pub async fn handle_config(
    action: ConfigAction,
    config: &Config,
    config_path: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let path = match config_path {
        Some(path) => path.to_path_buf(),
        None => Config::default_config_path()?,
    };

    match action {
        ConfigAction::Show => match format {
            OutputFormat::Text => {
                let toml_string =
                    toml::to_string_pretty(config).context("Failed to serialize config")?;
                println!("# {}", path.display());
                println!("{}", toml_string);
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(config)?);
            }
        },
        ConfigAction::Validate => {
            let result = config.validate();
            match format {
                OutputFormat::Text => match &result {
                    Ok(()) => println!("✓ {} is valid", path.display()),
                    Err(e) => {
                        println!("✗ {}", e);
                        println!("  {}", e.user_hint());
                    }
                },
                OutputFormat::Json => {
                    let output = json!({
                        "path": path,
                        "valid": result.is_ok(),
                        "error": result.as_ref().err().map(|e| e.to_string()),
                    });
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
            }
            result?;
        }
        ConfigAction::Path => match format {
            OutputFormat::Text => println!("{}", path.display()),
            OutputFormat::Json => println!("{}", json!({ "path": path })),
        },
    }

    Ok(())
}
