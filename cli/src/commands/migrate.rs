// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `conductor migrate`: apply the bundled schema to the configured database.

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;
use tracing::info;

use conductor_core::domain::orchestrator_config::OrchestratorConfigManifest;
use conductor_core::infrastructure::db::Database;

pub async fn run(config_path: Option<PathBuf>) -> Result<()> {
    let config = OrchestratorConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;
    let storage = &config.spec.storage;

    let url = storage
        .database_url
        .as_deref()
        .context("No database configured: set spec.storage.database_url or CONDUCTOR_DATABASE_URL")?;

    let database = Database::new(url, storage.max_connections)
        .await
        .context("Failed to connect to database")?;
    database.migrate().await.context("Failed to apply migrations")?;

    info!("Migrations applied");
    println!("{}", "✓ Database schema is up to date".green());
    Ok(())
}
