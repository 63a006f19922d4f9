//! `control-plane` — the operator CLI binary. Wires the canary
//! controller's collaborators (router, metric source, notifier,
//! metrics) from config and environment, then dispatches one `deploy`
//! subcommand; `health` wires a narrower set (just the database pool
//! and, if configured, the Prometheus endpoint) and skips the canary
//! controller entirely.
//!
//! The delivery orchestrator (component F) and its partner-specific
//! `sqlx`-backed collaborators are a library surface exercised by
//! integration tests and, eventually, an ingestion front-end — out of
//! this binary's scope, since the CLI is specified only as the canary
//! operator surface (§1 Non-goals).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use progressive_delivery::canary::CanaryController;
use progressive_delivery::cli::{run_health, run_list, run_metrics, run_monitor, run_rollback, run_start, run_status, Cli, DeployCommands, TopLevel};
use progressive_delivery::config::Config;
use progressive_delivery::domain::ControlPlaneError;
use progressive_delivery::metrics_source::{MetricSource, PrometheusMetricSource, StubMetricSource};
use progressive_delivery::notify::NotificationDispatcher;
use progressive_delivery::observability;
use progressive_delivery::observability::health::{DatabaseHealthCheck, ExternalServiceHealthCheck};
use progressive_delivery::observability::HealthChecker;
use progressive_delivery::router::{HttpTrafficRouter, InMemoryRouter, TrafficRouter};
use progressive_delivery::storage::DatabasePool;

#[tokio::main]
async fn main() {
    let exit_code = match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            1
        }
    };
    std::process::exit(exit_code);
}

async fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config).with_context(|| format!("loading config from {}", cli.config.display()))?;

    let metrics = Arc::new(
        observability::init(&config.observability).map_err(ControlPlaneError::internal)?,
    );
    info!(version = progressive_delivery::VERSION, "control-plane starting");

    let command = match cli.command {
        TopLevel::Health { json } => return Ok(run_health(&health_checker(&config).await?, json).await),
        TopLevel::Deploy(command) => command,
    };

    let router: Arc<dyn TrafficRouter> = match config.feature_flags.provider.as_str() {
        "http" => {
            let base_url = std::env::var("FEATURE_FLAG_BASE_URL").map_err(|_| {
                ControlPlaneError::config(
                    "FEATURE_FLAG_BASE_URL must be set when feature_flags.provider is 'http'",
                )
            })?;
            Arc::new(HttpTrafficRouter::from_env(base_url).context("building the http feature-flag router")?)
        }
        _ => Arc::new(InMemoryRouter::new()),
    };

    let metric_source: Arc<dyn MetricSource> = match std::env::var("PROMETHEUS_URL") {
        Ok(url) => Arc::new(PrometheusMetricSource::new(url)),
        Err(_) => Arc::new(StubMetricSource::new()),
    };

    let notifier = NotificationDispatcher::from_config(&config.notifications);

    let tick_interval = Duration::from_secs(config.monitoring.tick_interval_secs);
    let config = Arc::new(config);
    let controller = Arc::new(CanaryController::new(config, router, metric_source, notifier, metrics));

    let code = match command {
        DeployCommands::Start { service, version, region, auto_promote, duration, json } => {
            run_start(&controller, service, version, region, auto_promote, duration, json, tick_interval).await?
        }
        DeployCommands::Monitor { deployment_id, duration, json } => {
            run_monitor(&controller, deployment_id, duration, json, tick_interval).await?
        }
        DeployCommands::Status { deployment_id, json } => run_status(&controller, deployment_id, json).await?,
        DeployCommands::Metrics { deployment_id, json } => run_metrics(&controller, deployment_id, json).await?,
        DeployCommands::Rollback { deployment_id, reason, json } => {
            run_rollback(&controller, deployment_id, reason, json).await?
        }
        DeployCommands::List { json } => run_list(&controller, json).await?,
    };

    Ok(code)
}

/// Builds a `HealthChecker` wired to the database and (if configured)
/// the Prometheus metric source — the collaborators a single `health`
/// invocation can stand up without the full canary controller.
async fn health_checker(config: &Config) -> progressive_delivery::Result<HealthChecker> {
    let checker = HealthChecker::new(config.observability.health.clone());

    let pool = DatabasePool::connect(&config.database).await?;
    checker
        .register(Arc::new(DatabaseHealthCheck::new("database", Arc::new(pool), true)))
        .await;

    if let Ok(url) = std::env::var("PROMETHEUS_URL") {
        checker
            .register(Arc::new(ExternalServiceHealthCheck::new("prometheus", url, false)))
            .await;
    }

    Ok(checker)
}
