//! Operator CLI surface: `control-plane deploy <start|monitor|status|metrics|rollback|list>`.
//!
//! One process, one `CanaryController`. `deploy start --auto-promote`
//! drives a deployment through advance/rollback decisions inline,
//! printing one compact line per tick, until it reaches a terminal
//! state or the `--duration` budget runs out. The other subcommands
//! only resolve a deployment started earlier in the *same* process
//! invocation — an honest consequence of the in-memory,
//! single-controller-owned deployment model (see DESIGN.md).

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::canary::CanaryController;
use crate::domain::{ControlPlaneError, Deployment, DeploymentStatus, Result};
use crate::observability::HealthChecker;

#[derive(Parser)]
#[command(name = "control-plane", version, about = "Progressive-delivery control plane operator CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub command: TopLevel,

    /// Path to the YAML config file.
    #[arg(long, global = true, default_value = "config.yaml", env = "CONTROL_PLANE_CONFIG")]
    pub config: std::path::PathBuf,
}

#[derive(Subcommand)]
pub enum TopLevel {
    /// Canary deployment operations.
    #[command(subcommand)]
    Deploy(DeployCommands),
    /// Run the registered health checks once and print the result.
    Health {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum DeployCommands {
    /// Start a canary deployment for a service/version/region.
    Start {
        #[arg(long)]
        service: String,
        #[arg(long)]
        version: String,
        #[arg(long)]
        region: String,
        /// Drive the deployment inline, printing a compact line per
        /// monitor tick, until it reaches a terminal state.
        #[arg(long)]
        auto_promote: bool,
        /// Wall-clock budget for --auto-promote, in minutes. Exceeding
        /// it without reaching a terminal state exits non-zero.
        #[arg(long)]
        duration: Option<u64>,
        #[arg(long)]
        json: bool,
    },
    /// Poll a deployment's status at a fixed cadence, printing one
    /// compact line per tick, until it reaches a terminal state.
    Monitor {
        #[arg(long)]
        deployment_id: Uuid,
        /// Wall-clock budget, in minutes. Runs until the deployment
        /// reaches a terminal state if omitted.
        #[arg(long)]
        duration: Option<u64>,
        #[arg(long)]
        json: bool,
    },
    /// Print a deployment's current status.
    Status {
        #[arg(long)]
        deployment_id: Uuid,
        #[arg(long)]
        json: bool,
    },
    /// Print a deployment's observed metrics and error budget.
    Metrics {
        #[arg(long)]
        deployment_id: Uuid,
        #[arg(long)]
        json: bool,
    },
    /// Roll a deployment back.
    Rollback {
        #[arg(long)]
        deployment_id: Uuid,
        #[arg(long, default_value = "operator requested rollback")]
        reason: String,
        #[arg(long)]
        json: bool,
    },
    /// List every deployment known to this process.
    List {
        #[arg(long)]
        json: bool,
    },
}

fn print_deployment(d: &Deployment, json: bool) {
    if json {
        println!("{}", serde_json::to_string_pretty(d).unwrap_or_default());
        return;
    }
    println!("id: {}", d.id);
    println!("service: {}", d.service);
    println!("version: {}", d.version);
    println!("region: {}", d.region);
    println!("status: {:?}", d.status);
    println!("current_stage: {}", d.current_stage);
    println!("current_weight: {:.4}", d.current_weight);
    println!("started_at: {}", d.started_at.to_rfc3339());
    if let Some(completed) = d.completed_at {
        println!("completed_at: {}", completed.to_rfc3339());
    }
}

/// One compact monitor-tick line: stage, weight, error rate, P95,
/// budget status — per the CLI contract in §4.CLI.
fn print_tick_line(d: &Deployment, json: bool) {
    if json {
        println!("{}", serde_json::to_string_pretty(d).unwrap_or_default());
        return;
    }
    println!(
        "stage={} weight={:.4} error_rate={:.4} p95_ms={:.1} budget={:?} status={:?}",
        d.current_stage,
        d.current_weight,
        d.metrics.error_rate,
        d.metrics.latency_p95_ms,
        d.error_budget.status,
        d.status,
    );
}

fn print_metrics(d: &Deployment, json: bool) {
    if json {
        let payload = serde_json::json!({
            "deployment_id": d.id,
            "metrics": d.metrics,
            "error_budget": d.error_budget,
        });
        println!("{}", serde_json::to_string_pretty(&payload).unwrap_or_default());
        return;
    }
    println!("deployment_id: {}", d.id);
    println!("request_count: {}", d.metrics.request_count);
    println!("error_count: {}", d.metrics.error_count);
    println!("error_rate: {:.4}", d.metrics.error_rate);
    println!("latency_p50_ms: {:.2}", d.metrics.latency_p50_ms);
    println!("latency_p95_ms: {:.2}", d.metrics.latency_p95_ms);
    println!("latency_p99_ms: {:.2}", d.metrics.latency_p99_ms);
    println!("availability_pct: {:.4}", d.metrics.availability_pct);
    println!("budget_total_pct: {:.4}", d.error_budget.total_pct);
    println!("budget_consumed_pct: {:.4}", d.error_budget.consumed_pct);
    println!("budget_remaining_pct: {:.4}", d.error_budget.remaining_pct);
    println!("budget_burn_rate: {:.4}", d.error_budget.burn_rate);
    println!("budget_status: {:?}", d.error_budget.status);
}

/// `deploy start`. Exit code: 0 on success, or on an `--auto-promote`
/// run that completes; 1 if it rolls back or the duration budget
/// expires first.
pub async fn run_start(
    controller: &Arc<CanaryController>,
    service: String,
    version: String,
    region: String,
    auto_promote: bool,
    duration: Option<u64>,
    json: bool,
    tick_interval: Duration,
) -> Result<i32> {
    let deployment = controller.start(service, version, region).await?;
    print_deployment(&deployment, json);

    if !auto_promote {
        return Ok(0);
    }

    drive_to_terminal(controller, deployment.id, duration, json, tick_interval).await
}

/// `deploy monitor`. Same inline-drive loop as `start --auto-promote`,
/// against a deployment assumed to already exist in this process.
pub async fn run_monitor(
    controller: &Arc<CanaryController>,
    deployment_id: Uuid,
    duration: Option<u64>,
    json: bool,
    tick_interval: Duration,
) -> Result<i32> {
    drive_to_terminal(controller, deployment_id, duration, json, tick_interval).await
}

async fn drive_to_terminal(
    controller: &Arc<CanaryController>,
    deployment_id: Uuid,
    duration_minutes: Option<u64>,
    json: bool,
    tick_interval: Duration,
) -> Result<i32> {
    let handle = controller.start_monitoring(tick_interval).await;
    let deadline = duration_minutes.map(|m| tokio::time::Instant::now() + Duration::from_secs(m * 60));

    let outcome = loop {
        let current = controller.status(deployment_id).await?;
        print_tick_line(&current, json);

        if current.status.is_terminal() {
            break Ok(current.status);
        }

        if let Some(deadline) = deadline {
            if tokio::time::Instant::now() >= deadline {
                break Err(());
            }
        }

        tokio::time::sleep(tick_interval).await;
    };

    controller.stop_monitoring().await;
    handle.join.abort();

    match outcome {
        Ok(DeploymentStatus::Completed) => Ok(0),
        Ok(_) => Ok(1),
        Err(()) => {
            eprintln!("duration budget exceeded before deployment '{deployment_id}' reached a terminal state");
            Ok(1)
        }
    }
}

pub async fn run_status(controller: &Arc<CanaryController>, deployment_id: Uuid, json: bool) -> Result<i32> {
    let deployment = controller.status(deployment_id).await?;
    print_deployment(&deployment, json);
    Ok(0)
}

pub async fn run_metrics(controller: &Arc<CanaryController>, deployment_id: Uuid, json: bool) -> Result<i32> {
    let deployment = controller.status(deployment_id).await?;
    print_metrics(&deployment, json);
    Ok(0)
}

/// `deploy rollback`. Exit code 0 means the rollback (or the
/// manual-approval pause it triggered) was accepted, never that
/// traffic is still flowing — check `status` for the resulting state.
pub async fn run_rollback(
    controller: &Arc<CanaryController>,
    deployment_id: Uuid,
    reason: String,
    json: bool,
) -> Result<i32> {
    let deployment = controller.rollback(deployment_id, reason).await?;
    print_deployment(&deployment, json);
    Ok(0)
}

pub async fn run_list(controller: &Arc<CanaryController>, json: bool) -> Result<i32> {
    let deployments = controller.list().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&deployments).unwrap_or_default());
        return Ok(0);
    }
    if deployments.is_empty() {
        println!("no deployments in this process");
        return Ok(0);
    }
    for d in &deployments {
        println!(
            "{}  {}  {}  {}  {:?}  stage={} weight={:.4}",
            d.id, d.service, d.version, d.region, d.status, d.current_stage, d.current_weight
        );
    }
    Ok(0)
}

/// `health`. Runs every registered check once. Exit code 0 only when
/// every component reports healthy; degraded or unhealthy both exit 1,
/// since an operator script only needs to know "is this fine".
pub async fn run_health(checker: &HealthChecker, json: bool) -> i32 {
    let health = checker.check_health().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&health).unwrap_or_default());
    } else {
        println!("status: {}", health.status);
        println!("version: {}", health.version);
        println!("uptime_seconds: {}", health.uptime_seconds);
        for component in &health.components {
            println!(
                "  {} [{}] {}ms{}",
                component.name,
                component.status,
                component.check_duration_ms,
                component.message.as_ref().map(|m| format!(" — {m}")).unwrap_or_default(),
            );
        }
    }
    match health.status {
        crate::observability::HealthStatus::Healthy => 0,
        _ => 1,
    }
}

/// Maps a top-level failure to the process exit code named in the
/// operator-surface contract.
pub fn exit_code_for(err: &ControlPlaneError) -> i32 {
    err.exit_code()
}
