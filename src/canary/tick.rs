//! The monitor tick: the five-step algorithm in §4.G run once per
//! `active` deployment, plus the background loop that drives it at a
//! configured cadence.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::RollbackMetric;
use crate::domain::{DeploymentStatus, Metrics, NotificationEvent, NotificationSubject, Severity};

use super::CanaryController;

/// §5: a tick that doesn't complete within this deadline, or that is
/// cancelled mid-flight, drops its in-flight attempt and leaves the
/// deployment unchanged rather than applying a half-computed decision.
const TICK_DEADLINE: StdDuration = StdDuration::from_secs(10);

/// Returned by `start_monitoring`; dropping it does not stop the loop —
/// call `stop_monitoring` on the controller, or keep the handle and
/// `.abort()` it directly in tests.
pub struct MonitorHandle {
    pub join: JoinHandle<()>,
}

pub(crate) fn spawn_monitor_loop(
    controller: Arc<CanaryController>,
    interval: StdDuration,
    cancellation: CancellationToken,
) -> MonitorHandle {
    let join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tick_all(&controller, &cancellation).await;
                }
                _ = cancellation.cancelled() => {
                    debug!("canary monitor loop shutting down");
                    break;
                }
            }
        }
    });

    MonitorHandle { join }
}

/// Fans out one tick per currently-`Active` deployment. Deployments for
/// different `(service, region)` advance independently and in
/// parallel; per-deployment exclusion is still taken so an operator
/// rollback can't race this tick.
async fn tick_all(controller: &Arc<CanaryController>, cancellation: &CancellationToken) {
    let active_ids: Vec<uuid::Uuid> = controller
        .deployments()
        .read()
        .await
        .values()
        .filter(|d| d.status == DeploymentStatus::Active)
        .map(|d| d.id)
        .collect();

    let mut handles = Vec::with_capacity(active_ids.len());
    for id in active_ids {
        let controller = controller.clone();
        let cancellation = cancellation.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = tick_one(&controller, id, &cancellation).await {
                warn!(deployment_id = %id, error = %e, "monitor tick failed, will retry next interval");
            }
        }));
    }
    for handle in handles {
        let _ = handle.await;
    }
}

async fn tick_one(
    controller: &Arc<CanaryController>,
    id: uuid::Uuid,
    cancellation: &CancellationToken,
) -> Result<(), super::CanaryError> {
    let lock = controller.tick_lock(id).await;
    let _guard = lock.lock().await;

    let timer = crate::observability::metrics::start_timer(
        &controller
            .metrics()
            .monitor_tick_duration_seconds
            .with_label_values(&["canary"]),
    );

    let result = tokio::select! {
        res = tokio::time::timeout(TICK_DEADLINE, run_tick(controller, id)) => res.unwrap_or_else(|_| {
            warn!(deployment_id = %id, "monitor tick exceeded its deadline, leaving deployment state unchanged");
            Ok(())
        }),
        _ = cancellation.cancelled() => {
            warn!(deployment_id = %id, "monitor tick cancelled, leaving deployment state unchanged");
            Ok(())
        }
    };

    timer.observe_duration();
    if result.is_err() {
        controller.metrics().monitor_tick_errors_total.with_label_values(&["canary"]).inc();
    }
    result
}

async fn run_tick(controller: &Arc<CanaryController>, id: uuid::Uuid) -> Result<(), super::CanaryError> {
    // Re-read the snapshot now that we hold the exclusion lock: an
    // operator rollback may have completed while we waited.
    let snapshot = {
        let deployments = controller.deployments().read().await;
        match deployments.get(&id) {
            Some(d) if d.status == DeploymentStatus::Active => d.clone(),
            _ => return Ok(()),
        }
    };

    // Step 1: fetch the five-query metric bundle.
    let mut labels = HashMap::new();
    labels.insert("service".to_string(), snapshot.service.clone());
    labels.insert("version".to_string(), snapshot.version.clone());
    labels.insert("region".to_string(), snapshot.region.clone());
    labels.insert("deployment".to_string(), "canary".to_string());

    let metric_source = controller.metric_source();
    let request_count = metric_source.query_instant("request_count", &labels).await?;
    let error_count = metric_source.query_instant("error_count", &labels).await?;
    let p50 = metric_source.query_instant("latency_p50", &labels).await?;
    let p95 = metric_source.query_instant("latency_p95", &labels).await?;
    let p99 = metric_source.query_instant("latency_p99", &labels).await?;

    let metrics = Metrics::from_counts(request_count as u64, error_count as u64, p50, p95, p99);

    // Step 2: error budget.
    let error_budget_config = &controller.config().global.error_budget;
    let error_budget = crate::domain::ErrorBudget::compute(
        metrics.availability_pct,
        error_budget_config.availability,
        error_budget_config.burn_rate_thresholds.warning,
        error_budget_config.burn_rate_thresholds.critical,
    );

    {
        let mut deployments = controller.deployments().write().await;
        if let Some(d) = deployments.get_mut(&id) {
            d.metrics = metrics;
            d.error_budget = error_budget;
        }
    }

    controller
        .metrics()
        .error_budget_remaining_pct
        .with_label_values(&[&snapshot.service, &snapshot.region])
        .set(error_budget.remaining_pct);
    controller
        .metrics()
        .error_budget_burn_rate
        .with_label_values(&[&snapshot.service, &snapshot.region])
        .set(error_budget.burn_rate);

    // Step 3: rollback gate, rules evaluated in declared order, first match wins.
    for criterion in &controller.config().global.rollback.criteria {
        let fires = match criterion.metric {
            RollbackMetric::ErrorRate => metrics.error_rate > criterion.threshold,
            RollbackMetric::LatencyP95 => metrics.latency_p95_ms > criterion.threshold,
            RollbackMetric::Availability => metrics.availability_pct < criterion.threshold,
            RollbackMetric::BudgetBurnRate => error_budget.burn_rate > criterion.threshold,
        };

        if fires {
            // error_rate is a fraction internally; render it (and its
            // threshold) as the percentage an operator reads in the
            // notification, not the raw 0..1 value.
            let reason = match criterion.metric {
                RollbackMetric::ErrorRate => format!(
                    "error_rate = {:.2}% breached threshold {:.2}%",
                    metrics.error_rate * 100.0,
                    criterion.threshold * 100.0
                ),
                RollbackMetric::LatencyP95 => format!(
                    "latency_p95 = {:.2}ms breached threshold {:.2}ms",
                    metrics.latency_p95_ms, criterion.threshold
                ),
                RollbackMetric::Availability => format!(
                    "availability = {:.2}% breached threshold {:.2}%",
                    metrics.availability_pct, criterion.threshold
                ),
                RollbackMetric::BudgetBurnRate => format!(
                    "budget_burn_rate = {:.2} breached threshold {:.2}",
                    error_budget.burn_rate, criterion.threshold
                ),
            };
            controller.force_rollback_locked(id, reason).await?;
            return Ok(());
        }
    }

    // Step 4: advance gate, all conditions must hold.
    let stages = controller
        .config()
        .stages_for(&snapshot.service)
        .map_err(|_| super::CanaryError::NoStages(snapshot.service.clone()))?;
    let current = stages
        .get(snapshot.current_stage)
        .copied()
        .ok_or_else(|| super::CanaryError::NoStages(snapshot.service.clone()))?;

    let dwell_elapsed = chrono::Utc::now() - snapshot.last_transition_at;
    let dwell_satisfied = dwell_elapsed >= current.min_duration;
    let sample_satisfied = metrics.request_count >= current.min_sample_size;
    let budget_ok = !matches!(
        error_budget.status,
        crate::domain::BudgetStatus::Critical | crate::domain::BudgetStatus::Exhausted
    );

    if dwell_satisfied && sample_satisfied && budget_ok {
        let next_stage_index = snapshot.current_stage + 1;
        if next_stage_index >= stages.len() {
            complete(controller, id, &snapshot).await?;
        } else {
            advance(controller, id, &snapshot, next_stage_index, &stages).await?;
        }
    }

    Ok(())
}

async fn advance(
    controller: &Arc<CanaryController>,
    id: uuid::Uuid,
    snapshot: &crate::domain::Deployment,
    next_stage_index: usize,
    stages: &[crate::domain::Stage],
) -> Result<(), super::CanaryError> {
    let next_stage = stages[next_stage_index];
    controller
        .router()
        .set_percentage(&snapshot.service, &snapshot.region, next_stage.weight)
        .await?;

    {
        let mut deployments = controller.deployments().write().await;
        if let Some(d) = deployments.get_mut(&id) {
            d.current_stage = next_stage_index;
            d.current_weight = next_stage.weight;
            d.transition(DeploymentStatus::Active, Some(format!("advanced to stage {next_stage_index}")));
        }
    }

    controller
        .metrics()
        .stage_transitions_total
        .with_label_values(&[&snapshot.service, &snapshot.region])
        .inc();
    controller
        .metrics()
        .current_weight
        .with_label_values(&[&snapshot.service, &snapshot.region])
        .set(next_stage.weight);

    controller
        .notifier()
        .dispatch(NotificationEvent::new(
            "stage_transition",
            NotificationSubject::Deployment {
                id,
                service: snapshot.service.clone(),
                version: snapshot.version.clone(),
                region: snapshot.region.clone(),
            },
            Severity::Info,
            format!("advanced to stage {next_stage_index} ({:.0}%)", next_stage.weight * 100.0),
        ))
        .await;

    Ok(())
}

async fn complete(
    controller: &Arc<CanaryController>,
    id: uuid::Uuid,
    snapshot: &crate::domain::Deployment,
) -> Result<(), super::CanaryError> {
    controller.router().set_percentage(&snapshot.service, &snapshot.region, 1.0).await?;

    {
        let mut deployments = controller.deployments().write().await;
        if let Some(d) = deployments.get_mut(&id) {
            d.current_weight = 1.0;
            d.transition(DeploymentStatus::Completed, None);
        }
    }

    controller
        .metrics()
        .deployments_completed_total
        .with_label_values(&[&snapshot.service, &snapshot.region])
        .inc();
    controller
        .metrics()
        .current_weight
        .with_label_values(&[&snapshot.service, &snapshot.region])
        .set(1.0);

    controller
        .notifier()
        .dispatch(NotificationEvent::new(
            "complete",
            NotificationSubject::Deployment {
                id,
                service: snapshot.service.clone(),
                version: snapshot.version.clone(),
                region: snapshot.region.clone(),
            },
            Severity::Info,
            "deployment completed, now serving 100% of traffic",
        ))
        .await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics_source::StubMetricSource;
    use crate::notify::NotificationDispatcher;
    use crate::observability::MetricsConfig;
    use crate::router::{InMemoryRouter, TrafficRouter};
    use std::sync::Arc;

    fn config(criteria_yaml: &str, stages_yaml: &str, manual_approval: bool) -> Arc<crate::config::Config> {
        let yaml = format!(
            r#"
global:
  errorBudget:
    availability: 99.9
    budgetWindowHours: 24
    burnRateThresholds: {{ warning: 3, critical: 6 }}
  rollback:
    criteria:
{criteria_yaml}
  stages:
{stages_yaml}
services:
  api:
    enabled: true
    rollback: {{ manualApprovalRequired: {manual_approval} }}
"#
        );
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, &yaml).unwrap();
        Arc::new(crate::config::Config::load(&path).unwrap())
    }

    fn controller_with(config: Arc<crate::config::Config>, source: StubMetricSource, router: InMemoryRouter) -> Arc<CanaryController> {
        let metrics = Arc::new(
            crate::observability::MetricsRegistry::new(MetricsConfig {
                enabled: true,
                endpoint: "/metrics".into(),
                port: None,
                include_process_metrics: false,
                latency_buckets: vec![0.1, 1.0],
            })
            .unwrap(),
        );
        Arc::new(CanaryController::new(
            config,
            Arc::new(router),
            Arc::new(source),
            NotificationDispatcher::new(vec![]),
            metrics,
        ))
    }

    #[tokio::test]
    async fn healthy_metrics_advance_after_dwell_and_sample() {
        let criteria = "      - { metric: error_rate, threshold: 0.05 }\n";
        let stages = "    - { weight: 0.01, duration: \"0m\", minSampleSize: 100 }\n    - { weight: 1.0, duration: \"0m\", minSampleSize: 0 }\n";
        let cfg = config(criteria, stages, false);
        let source = StubMetricSource::new();
        source.set("request_count", 1000.0).await;
        source.set("error_count", 1.0).await;
        source.set("latency_p95", 80.0).await;

        let controller = controller_with(cfg, source, InMemoryRouter::new());
        let deployment = controller.start("api", "v1", "us-east-1").await.unwrap();

        run_tick(&controller, deployment.id).await.unwrap();

        let updated = controller.status(deployment.id).await.unwrap();
        assert_eq!(updated.current_stage, 1);
        assert_eq!(updated.current_weight, 1.0);
    }

    #[tokio::test]
    async fn insufficient_sample_holds_stage() {
        let criteria = "      - { metric: error_rate, threshold: 0.05 }\n";
        let stages = "    - { weight: 0.01, duration: \"0m\", minSampleSize: 100 }\n    - { weight: 1.0, duration: \"0m\", minSampleSize: 0 }\n";
        let cfg = config(criteria, stages, false);
        let source = StubMetricSource::new();
        source.set("request_count", 50.0).await;
        source.set("error_count", 0.0).await;

        let controller = controller_with(cfg, source, InMemoryRouter::new());
        let deployment = controller.start("api", "v1", "us-east-1").await.unwrap();

        run_tick(&controller, deployment.id).await.unwrap();

        let updated = controller.status(deployment.id).await.unwrap();
        assert_eq!(updated.current_stage, 0);
        assert_eq!(updated.status, DeploymentStatus::Active);
    }

    #[tokio::test]
    async fn error_rate_breach_rolls_back() {
        let criteria = "      - { metric: error_rate, threshold: 0.05 }\n";
        let stages = "    - { weight: 0.01, duration: \"5m\", minSampleSize: 100 }\n    - { weight: 1.0, duration: \"0m\", minSampleSize: 0 }\n";
        let cfg = config(criteria, stages, false);
        let source = StubMetricSource::new();
        source.set("request_count", 1000.0).await;
        source.set("error_count", 60.0).await;

        let controller = controller_with(cfg, source, InMemoryRouter::new());
        let deployment = controller.start("api", "v1", "us-east-1").await.unwrap();

        run_tick(&controller, deployment.id).await.unwrap();

        let updated = controller.status(deployment.id).await.unwrap();
        assert_eq!(updated.status, DeploymentStatus::RolledBack);
        assert_eq!(
            controller.router().get_percentage("api", "us-east-1").await.unwrap(),
            0.0
        );
    }
}
