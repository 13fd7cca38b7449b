//! CLI interface for Strata
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Strata agent runtime
///
/// Turns a product concept into a market requirements document using the
/// configured AI providers, pausing to ask clarification questions when the
/// request is incomplete.
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a new workflow
    Run {
        /// Product concept to research
        #[arg(long)]
        concept: String,

        /// Target market for the product
        #[arg(long)]
        market: String,

        /// Any further details about the request
        #[arg(long)]
        details: Option<String>,

        /// Where to write the workflow state (needed to resume)
        #[arg(long, value_name = "PATH")]
        state_out: Option<PathBuf>,
    },

    /// Resume a paused workflow
    Resume {
        /// State file written by a previous run
        #[arg(long, value_name = "PATH")]
        state: PathBuf,

        /// JSON file with clarification answers
        #[arg(long, value_name = "PATH")]
        answers: Option<PathBuf>,

        /// Where to write the new state (defaults to --state)
        #[arg(long, value_name = "PATH")]
        state_out: Option<PathBuf>,
    },

    /// Show provider availability and fallback order
    Providers {
        /// Send a short prompt through the fallback chain
        #[arg(long)]
        probe: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate,

    /// Print the configuration file path
    Path,
}
