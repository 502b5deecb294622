// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use conductor_core::domain::orchestrator_config::{OrchestratorConfigManifest, StorageBackend};

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate a configuration file populated with the defaults
    Generate {
        /// Output path
        #[arg(short, long, default_value = "./conductor-config.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, force } => generate(output, force).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = OrchestratorConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. CONDUCTOR_CONFIG_PATH: {}",
            std::env::var("CONDUCTOR_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./conductor-config.yaml");
        println!("  4. ~/.conductor/config.yaml");
        println!("  5. /etc/conductor/config.yaml");
        println!();
    }

    let spec = &config.spec;
    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Identity:".bold());
    println!("  Name: {}", config.metadata.name);
    if let Some(version) = &config.metadata.version {
        println!("  Version: {}", version);
    }
    println!();

    println!("{}", "Server:".bold());
    println!("  Listen: {}:{}", spec.server.bind_address, spec.server.port);
    println!();

    println!("{}", "Storage:".bold());
    match spec.storage.backend {
        StorageBackend::InMemory => println!("  Backend: in_memory"),
        StorageBackend::Postgres => {
            println!("  Backend: postgres");
            println!(
                "  Database URL: {}",
                if spec.storage.database_url.is_some() { "(set)" } else { "(missing)" }
            );
            println!("  Max connections: {}", spec.storage.max_connections);
        }
    }
    println!();

    let capacity = &spec.capacity;
    println!("{}", "Capacity:".bold());
    println!("  Max capacity: {} tokens", capacity.max_capacity);
    println!("  Per-call cap: {} tokens", capacity.per_call_token_cap);
    println!("  EMA alpha: {}", capacity.ema_alpha);
    println!(
        "  Zones: yellow {}% / orange {}% / red {}% / critical {}%",
        capacity.thresholds.yellow, capacity.thresholds.orange, capacity.thresholds.red, capacity.thresholds.critical
    );
    println!("  Compaction cooldown: {}s", capacity.compact_cooldown_seconds);
    println!();

    println!("{}", "Messaging:".bold());
    println!("  Default TTL: {}s", spec.messaging.default_ttl_seconds);
    println!("  Fetch limit: {} (max {})", spec.messaging.default_limit, spec.messaging.max_limit);
    println!();

    println!("{}", "Compaction:".bold());
    println!("  Proactive: {}", spec.compaction.proactive_enabled);
    println!("  Restore budget: {} tokens", spec.compaction.default_restore_max_tokens);
    println!();

    println!("{}", "Observability:".bold());
    println!("  Log: {} ({})", spec.observability.log_level, spec.observability.log_format);
    if spec.observability.metrics.enabled {
        println!("  Metrics: enabled on port {}", spec.observability.metrics.port);
    } else {
        println!("  Metrics: {}", "disabled".dimmed());
    }

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = OrchestratorConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;

    config.validate().context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", output.display());
    }

    OrchestratorConfigManifest::default()
        .to_yaml_file(&output)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!("{}", format!("✓ Configuration generated: {}", output.display()).green());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generated_config_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conductor-config.yaml");

        generate(path.clone(), false).await.unwrap();
        let loaded = OrchestratorConfigManifest::from_yaml_file(&path).unwrap();
        loaded.validate().unwrap();

        assert!(generate(path.clone(), false).await.is_err());
        generate(path, true).await.unwrap();
    }
}
