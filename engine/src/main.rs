// Strata agent runtime
// Main entry point for the strata binary

use clap::Parser;
use strata_engine::cli::{Cli, Command};
use strata_engine::config::Config;
use strata_engine::handlers::{
    handle_config, handle_providers, handle_resume, handle_run, OutputFormat,
};
use strata_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log wins over the config file; RUST_LOG wins over both
    let level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(level);

    tracing::debug!("Strata v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Run {
            concept,
            market,
            details,
            state_out,
        } => {
            tracing::info!("Starting workflow for: {}", concept);
            handle_run(concept, market, details, state_out, &config, format).await
        }

        Command::Resume {
            state,
            answers,
            state_out,
        } => {
            tracing::info!("Resuming workflow from {}", state.display());
            handle_resume(state, answers, state_out, &config, format).await
        }

        Command::Providers { probe } => handle_providers(probe, &config, format).await,

        Command::Config { action } => {
            tracing::debug!("Config management: {:?}", action);
            handle_config(action, &config, cli.config.as_deref(), format).await
        }
    }
}
