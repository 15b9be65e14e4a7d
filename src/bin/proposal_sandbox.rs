//! proposal-sandbox: replay and verify governance proposals on a fork
//!
//! ## Commands
//!
//! - **run**: replay history, then run the current proposal through every phase
//! - **replay**: replay every proposal as history and print the registry
//! - **preview**: show a proposal's resolved actions without executing them
//! - **check**: validate a config and every file it references
//!
//! ## Example Usage
//!
//! ```bash
//! # Run the proposal marked current
//! proposal-sandbox run demos/proposals.yaml
//!
//! # Inspect what p2 would send, as JSON
//! proposal-sandbox --json preview demos/proposals.yaml --proposal p2
//! ```
//!
//! Exit codes: 0 success, 1 failure of the proposal under test, 2 invalid
//! configuration, 3 a historical proposal failed to replay.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use proposal_sandbox_core::config::LOG_FILTER_ENV;

mod sandbox_cli;

use sandbox_cli::{check::CheckCmd, preview::PreviewCmd, replay::ReplayCmd, run::RunCmd};

#[derive(Parser)]
#[command(
    name = "proposal-sandbox",
    author,
    version,
    about = "Replay and verify governance proposals on a disposable fork",
    long_about = "Replays every earlier proposal on a fresh fork of the live system, then \
                  drives the proposal under test through deploy, setup, run, teardown and \
                  validate."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON instead of human-readable format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (debug logging, per-phase timing)
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay history and run the current proposal
    Run(RunCmd),

    /// Replay every proposal, the current one included, as history
    Replay(ReplayCmd),

    /// Resolve a proposal's commands without executing them
    Preview(PreviewCmd),

    /// Validate a config and the proposal files it references
    Check(CheckCmd),
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Run(_) => "run",
            Commands::Replay(_) => "replay",
            Commands::Preview(_) => "preview",
            Commands::Check(_) => "check",
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_env(LOG_FILTER_ENV)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let Cli {
        command,
        json,
        verbose,
    } = Cli::parse();
    init_tracing(verbose);
    let command_name = command.name();
    tracing::debug!(command = command_name, json, "Starting");

    let result = match command {
        Commands::Run(cmd) => cmd.execute(json, verbose).await,
        Commands::Replay(cmd) => cmd.execute(json).await,
        Commands::Preview(cmd) => cmd.execute(json).await,
        Commands::Check(cmd) => cmd.execute(json),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            sandbox_cli::output::print_error(command_name, &err, json);
            ExitCode::from(sandbox_cli::exit_code(&err))
        }
    }
}
