// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon HTTP server implementation

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use conductor_core::domain::orchestrator_config::{MetricsConfig, OrchestratorConfigManifest};

use super::routes::router;
use super::state::AppState;

pub async fn start_daemon(config_path: Option<PathBuf>, port_override: Option<u16>) -> Result<()> {
    let mut config = OrchestratorConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;
    if let Some(port) = port_override {
        config.spec.server.port = port;
    }
    config.validate().context("Configuration validation failed")?;
    let spec = &config.spec;

    info!(
        name = %config.metadata.name,
        pid = std::process::id(),
        "Conductor daemon starting"
    );

    if spec.observability.metrics.enabled {
        install_metrics_exporter(&spec.observability.metrics)?;
    }

    let (state, worker) = AppState::from_config(spec).await.context("Failed to initialize services")?;

    let shutdown = CancellationToken::new();
    let mut background = state.conductor.start_background(worker, shutdown.clone());
    background.push(Arc::clone(&state.swarm.messaging).start_purge_sweep(shutdown.clone()));

    let app = router(state);

    let addr = format!("{}:{}", spec.server.bind_address, spec.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Daemon listening on {}", addr);

    // Cancel background tasks only once in-flight requests have finished;
    // the cascade worker then drains what they queued.
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed");

    shutdown.cancel();
    for handle in background {
        if let Err(e) = handle.await {
            warn!("Background task ended abnormally: {}", e);
        }
    }

    info!("Daemon shut down");

    served
}

fn install_metrics_exporter(config: &MetricsConfig) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    metrics::describe_counter!("conductor_tokens_tracked_total", "Tokens credited by token tracking");
    metrics::describe_gauge!("conductor_capacity_usage_percent", "Context usage per agent, in percent");
    metrics::describe_counter!("conductor_waves_terminal_total", "Waves that reached a terminal status");
    metrics::describe_counter!("conductor_batches_completed_total", "Batches finalised, by status");
    metrics::describe_counter!("conductor_conflicts_detected_total", "Conflicts found during aggregation");
    metrics::describe_counter!("conductor_messages_published_total", "Messages published, by topic");
    metrics::describe_counter!("conductor_cascade_jobs_total", "Cascade jobs processed, by outcome");
    metrics::describe_counter!("conductor_snapshots_saved_total", "Snapshots saved, by trigger");

    info!(port = config.port, "Prometheus exporter listening");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
