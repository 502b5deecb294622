// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Conductor CLI
//!
//! The `conductor` binary hosts the orchestration engine.
//!
//! ## Commands
//!
//! - `conductor serve` - Run the HTTP daemon (waves, batches, capacity, messaging, compaction)
//! - `conductor config show|validate|generate` - Configuration management
//! - `conductor plan "<task>"` - Offline wave plan for a task, printed as JSON
//! - `conductor estimate "<task>" --files N` - Offline complexity tier
//! - `conductor migrate` - Apply the PostgreSQL schema

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use conductor::commands::{self, ConfigCommand};
use conductor::daemon;
use conductor::logging::init_logging;
use conductor_core::domain::orchestrator_config::OrchestratorConfigManifest;

/// Conductor - wave-based orchestration for agent swarms
#[derive(Parser)]
#[command(name = "conductor")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "CONDUCTOR_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the configured level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP daemon
    #[command(name = "serve")]
    Serve {
        /// Override the configured listen port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Decompose a task into a wave plan without touching any store
    #[command(name = "plan")]
    Plan {
        #[command(flatten)]
        command: commands::plan::PlanArgs,
    },

    /// Estimate the complexity tier of a task
    #[command(name = "estimate")]
    Estimate {
        #[command(flatten)]
        command: commands::plan::EstimateArgs,
    },

    /// Apply database migrations
    #[command(name = "migrate")]
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is the normal case
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let observability = OrchestratorConfigManifest::load_or_default(cli.config.clone())
        .map(|manifest| manifest.spec.observability)
        .unwrap_or_default();
    let level = cli.log_level.as_deref().unwrap_or(&observability.log_level);
    init_logging(level, &observability.log_format)?;

    match cli.command {
        Some(Commands::Serve { port }) => daemon::start_daemon(cli.config, port).await,
        Some(Commands::Config { command }) => commands::config::handle_command(command, cli.config).await,
        Some(Commands::Plan { command }) => commands::plan::plan(command),
        Some(Commands::Estimate { command }) => commands::plan::estimate(command),
        Some(Commands::Migrate) => commands::migrate::run(cli.config).await,
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}
