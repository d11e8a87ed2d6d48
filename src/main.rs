/*
 * AMOS - Autonomous Kubernetes Self-Healing Controller
 * Copyright (C) 2025 AMOS Authors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! AMOS entry point.
//!
//! Wires the pipeline together: three watcher sets feed the fault detector,
//! which feeds the orchestrator. A small HTTP server exposes health
//! endpoints. Exit code 0 on clean shutdown, 1 on startup failure.

use amos::agent::{GeminiAgent, RemediationAgent};
use amos::cluster::{ClusterOps, KubeClusterOps};
use amos::config::Config;
use amos::context::ContextGenerator;
use amos::detector::FaultDetector;
use amos::k8s::{self, CHANNEL_CAPACITY};
use amos::notify::{EscalationService, SmtpMailer};
use amos::orchestrator::Orchestrator;
use amos::retry::RetryManager;
use amos::rollback::RollbackService;
use amos::snapshot::SnapshotService;
use amos::tools::ToolFacade;
use anyhow::{Context as _, Result};
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Autonomous Kubernetes self-healing controller
#[derive(Parser)]
#[command(name = "amos", version)]
#[command(about = "Watches cluster workloads and drives autonomous remediation")]
struct Cli {
    /// Path to a YAML configuration file (absent: environment variables only)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("fatal: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(path: Option<&Path>) -> Config {
    let Some(path) = path else {
        info!("no config file given, using environment variables and defaults");
        return Config::from_env();
    };
    match Config::from_file(path) {
        Ok(config) => {
            info!(path = %path.display(), "loaded configuration");
            config
        }
        Err(err) => {
            warn!(
                path = %path.display(),
                "could not load config file: {err:#}; using environment variables/defaults"
            );
            Config::from_env()
        }
    }
}

async fn run(cli: &Cli) -> Result<()> {
    info!("AMOS v{} starting", env!("CARGO_PKG_VERSION"));

    let config = load_config(cli.config.as_deref());
    config.validate().context("configuration invalid")?;

    let client = k8s::build_client(&config.kubernetes)
        .await
        .context("failed to create cluster client")?;
    info!("connected to Kubernetes cluster");

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.cancel();
        });
    }

    // Shared services.
    let cluster: Arc<dyn ClusterOps> = Arc::new(KubeClusterOps::new(client.clone()));
    let facade = Arc::new(ToolFacade::new(cluster.clone()));
    let retry = Arc::new(RetryManager::new(
        config.remediation.max_retries,
        config.remediation.retry_backoff(),
    ));
    let snapshots = Arc::new(SnapshotService::new(cluster.clone()));
    let rollback = Arc::new(RollbackService::new(cluster, snapshots.clone()));
    let context = Arc::new(ContextGenerator::new(facade.clone()));
    let agent: Arc<dyn RemediationAgent> = Arc::new(GeminiAgent::new(&config.agent, facade));
    let mailer = Arc::new(SmtpMailer::new(config.email.clone()));
    let escalation = Arc::new(EscalationService::new(
        mailer,
        config.email.engineer_email.clone(),
    ));

    // Pipeline channels: per-kind watcher feeds plus the orchestrator hop.
    let (pod_tx, pod_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (deployment_tx, deployment_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (job_tx, job_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (fault_tx, fault_rx) = mpsc::channel(CHANNEL_CAPACITY);

    let namespaces = &config.kubernetes.namespaces;
    let resync = config.monitoring.resync_interval();
    let mut handles = Vec::new();
    handles.extend(k8s::pod::spawn_watchers(
        &client, namespaces, resync, pod_tx, &shutdown,
    ));
    handles.extend(k8s::deployment::spawn_watchers(
        &client,
        namespaces,
        resync,
        deployment_tx,
        &shutdown,
    ));
    handles.extend(k8s::job::spawn_watchers(
        &client, namespaces, resync, job_tx, &shutdown,
    ));

    let detector = Arc::new(FaultDetector::new(config.remediation.dedup_window()));
    handles.push(tokio::spawn(detector.clone().run(
        pod_rx,
        deployment_rx,
        job_rx,
        fault_tx,
        shutdown.clone(),
    )));
    handles.push(tokio::spawn(detector.run_sweeper(shutdown.clone())));

    let orchestrator = Arc::new(Orchestrator::new(
        retry,
        snapshots,
        rollback,
        context,
        agent,
        escalation,
        config.remediation.enable_rollback,
    ));
    handles.push(tokio::spawn(orchestrator.run(fault_rx, shutdown.clone())));

    info!("AMOS is fully operational and watching for faults");

    serve_health(config.monitoring.health_port, shutdown.clone()).await?;

    info!("shutting down");
    for handle in handles {
        let _ = handle.await;
    }
    info!("shutdown complete");
    Ok(())
}

/// Health endpoints; runs until the shutdown token fires.
async fn serve_health(port: u16, shutdown: CancellationToken) -> Result<()> {
    let app = Router::new()
        .route("/health", get(health))
        .route("/ready", get(health));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind health endpoint on port {port}"))?;
    info!(port, "health endpoint listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("health server error")
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "amos",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("received SIGTERM, shutting down gracefully");
        },
    }
}
