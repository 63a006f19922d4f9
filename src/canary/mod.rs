//! Component G — Canary Controller. The richest subsystem: owns every
//! deployment's state machine, ticks a background monitor loop that
//! advances or rolls back each `active` deployment, and gates operator
//! commands through the same per-deployment exclusion the tick loop
//! uses so a manual rollback can never race a concurrent advance.

mod tick;

pub use tick::MonitorHandle;

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::domain::{Deployment, DeploymentStatus, NotificationEvent, NotificationSubject, Severity};
use crate::metrics_source::MetricSource;
use crate::notify::NotificationDispatcher;
use crate::observability::MetricsRegistry;
use crate::router::TrafficRouter;

#[derive(Error, Debug)]
pub enum CanaryError {
    #[error("service '{0}' is not canary-enabled")]
    ServiceNotEnabled(String),
    #[error("region '{region}' is not permitted for service '{service}'")]
    RegionNotAllowed { service: String, region: String },
    #[error("deployment '{0}' not found")]
    NotFound(Uuid),
    #[error("deployment '{0}' is already in a terminal state")]
    AlreadyTerminal(Uuid),
    #[error(transparent)]
    Router(#[from] crate::router::RouterError),
    #[error(transparent)]
    MetricSource(#[from] crate::metrics_source::MetricSourceError),
    #[error("no stages configured for service '{0}'")]
    NoStages(String),
}

impl CanaryError {
    pub fn is_policy(&self) -> bool {
        matches!(self, Self::ServiceNotEnabled(_) | Self::RegionNotAllowed { .. })
    }
}

/// Owns the process-wide deployment map. The monitor loop is the sole
/// mutator of any given deployment; operator calls either read a
/// snapshot or briefly take the same per-deployment exclusion lock
/// before mutating (`Rollback`), per the concurrency invariant in §5.
pub struct CanaryController {
    config: Arc<Config>,
    router: Arc<dyn TrafficRouter>,
    metric_source: Arc<dyn MetricSource>,
    notifier: NotificationDispatcher,
    metrics: Arc<MetricsRegistry>,
    deployments: Arc<RwLock<HashMap<Uuid, Deployment>>>,
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
    cancellation: Mutex<Option<CancellationToken>>,
}

impl CanaryController {
    pub fn new(
        config: Arc<Config>,
        router: Arc<dyn TrafficRouter>,
        metric_source: Arc<dyn MetricSource>,
        notifier: NotificationDispatcher,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            config,
            router,
            metric_source,
            notifier,
            metrics,
            deployments: Arc::new(RwLock::new(HashMap::new())),
            locks: Mutex::new(HashMap::new()),
            cancellation: Mutex::new(None),
        }
    }

    async fn lock_for(&self, id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Validates service/region policy, creates the deployment at stage
    /// 0, applies that weight to the router, and notifies `start`.
    pub async fn start(
        &self,
        service: impl Into<String>,
        version: impl Into<String>,
        region: impl Into<String>,
    ) -> Result<Deployment, CanaryError> {
        let service = service.into();
        let version = version.into();
        let region = region.into();

        if !self.config.service_enabled(&service) {
            return Err(CanaryError::ServiceNotEnabled(service));
        }
        if !self.config.region_allowed(&service, &region) {
            return Err(CanaryError::RegionNotAllowed { service, region });
        }

        let stages = self.config.stages_for(&service).map_err(|_| CanaryError::NoStages(service.clone()))?;
        let stage0 = *stages.first().ok_or_else(|| CanaryError::NoStages(service.clone()))?;

        let mut deployment = Deployment::new(service.clone(), version.clone(), region.clone(), stage0);
        self.router.set_percentage(&service, &region, stage0.weight).await?;
        deployment.transition(DeploymentStatus::Active, None);

        let id = deployment.id;
        self.deployments.write().await.insert(id, deployment.clone());

        self.metrics
            .deployments_started_total
            .with_label_values(&[&service, &region])
            .inc();

        self.notifier
            .dispatch(NotificationEvent::new(
                "start",
                NotificationSubject::Deployment { id, service, version, region },
                Severity::Info,
                "deployment started",
            ))
            .await;

        info!(deployment_id = %id, "deployment started");
        Ok(deployment)
    }

    /// `Rollback(id, reason)`. If the service requires manual approval
    /// and the deployment isn't already paused, parks it in `Paused`
    /// and asks an operator to confirm instead of rolling back
    /// directly. Otherwise sets the router to 0% and marks the
    /// deployment `RolledBack` — retrying the router write
    /// indefinitely, because the safety property depends on it.
    pub async fn rollback(&self, id: Uuid, reason: impl Into<String>) -> Result<Deployment, CanaryError> {
        let reason = reason.into();
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let snapshot = {
            let deployments = self.deployments.read().await;
            deployments.get(&id).cloned().ok_or(CanaryError::NotFound(id))?
        };

        if snapshot.status.is_terminal() {
            return Err(CanaryError::AlreadyTerminal(id));
        }

        if self.config.manual_approval_required(&snapshot.service) && snapshot.status != DeploymentStatus::Paused {
            let mut deployments = self.deployments.write().await;
            let deployment = deployments.get_mut(&id).ok_or(CanaryError::NotFound(id))?;
            deployment.transition(DeploymentStatus::Paused, Some(reason.clone()));
            let result = deployment.clone();
            drop(deployments);

            self.notifier
                .dispatch(NotificationEvent::new(
                    "rollback_approval_required",
                    NotificationSubject::Deployment {
                        id,
                        service: result.service.clone(),
                        version: result.version.clone(),
                        region: result.region.clone(),
                    },
                    Severity::Critical,
                    format!("rollback requires manual approval: {reason}"),
                ))
                .await;

            return Ok(result);
        }

        self.force_rollback(id, &snapshot, reason).await
    }

    /// Sets the router to 0% traffic, retrying with unbounded
    /// exponential backoff on failure — a rolled-back deployment must
    /// never keep serving non-zero traffic — then transitions to
    /// `RolledBack` and notifies.
    async fn force_rollback(
        &self,
        id: Uuid,
        snapshot: &Deployment,
        reason: String,
    ) -> Result<Deployment, CanaryError> {
        let mut attempt: u32 = 0;
        loop {
            match self.router.set_percentage(&snapshot.service, &snapshot.region, 0.0).await {
                Ok(()) => break,
                Err(e) => {
                    warn!(deployment_id = %id, attempt, error = %e, "rollback router write failed, retrying");
                    let delay = std::time::Duration::from_secs_f64((2u64.pow(attempt.min(10)) as f64).min(60.0));
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }

        let result = {
            let mut deployments = self.deployments.write().await;
            let deployment = deployments.get_mut(&id).ok_or(CanaryError::NotFound(id))?;
            deployment.current_weight = 0.0;
            deployment.transition(DeploymentStatus::RolledBack, Some(reason.clone()));
            deployment.clone()
        };

        self.metrics
            .deployments_rolled_back_total
            .with_label_values(&[&result.service, &result.region])
            .inc();

        self.notifier
            .dispatch(NotificationEvent::new(
                "rollback",
                NotificationSubject::Deployment {
                    id,
                    service: result.service.clone(),
                    version: result.version.clone(),
                    region: result.region.clone(),
                },
                Severity::Critical,
                reason,
            ))
            .await;

        info!(deployment_id = %id, "deployment rolled back");
        Ok(result)
    }

    /// Operator confirms a paused deployment's rollback.
    pub async fn confirm_rollback(&self, id: Uuid, reason: impl Into<String>) -> Result<Deployment, CanaryError> {
        let reason = reason.into();
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let snapshot = {
            let deployments = self.deployments.read().await;
            deployments.get(&id).cloned().ok_or(CanaryError::NotFound(id))?
        };

        if snapshot.status != DeploymentStatus::Paused {
            return Err(CanaryError::AlreadyTerminal(id));
        }

        self.force_rollback(id, &snapshot, reason).await
    }

    pub async fn status(&self, id: Uuid) -> Result<Deployment, CanaryError> {
        self.deployments.read().await.get(&id).cloned().ok_or(CanaryError::NotFound(id))
    }

    pub async fn list(&self) -> Vec<Deployment> {
        self.deployments.read().await.values().cloned().collect()
    }

    /// Starts the background monitor loop at the configured (or
    /// overridden) tick interval. Returns a handle the caller can stop
    /// later; calling this twice replaces the previous loop.
    pub async fn start_monitoring(self: &Arc<Self>, interval: std::time::Duration) -> MonitorHandle {
        let token = CancellationToken::new();
        *self.cancellation.lock().await = Some(token.clone());
        tick::spawn_monitor_loop(self.clone(), interval, token)
    }

    /// Cancels the monitor loop's token. Any tick already in flight
    /// drops its in-flight attempt, leaves the deployment unchanged,
    /// and logs a warning instead of completing the step (§5).
    pub async fn stop_monitoring(&self) {
        if let Some(token) = self.cancellation.lock().await.take() {
            token.cancel();
        }
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn metric_source(&self) -> &Arc<dyn MetricSource> {
        &self.metric_source
    }

    pub(crate) fn router(&self) -> &Arc<dyn TrafficRouter> {
        &self.router
    }

    pub(crate) fn notifier(&self) -> &NotificationDispatcher {
        &self.notifier
    }

    pub(crate) fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub(crate) fn deployments(&self) -> &Arc<RwLock<HashMap<Uuid, Deployment>>> {
        &self.deployments
    }

    pub(crate) async fn tick_lock(&self, id: Uuid) -> Arc<Mutex<()>> {
        self.lock_for(id).await
    }

    /// Used by the monitor loop to apply an advance/complete/rollback
    /// decision under the same per-deployment lock a tick already
    /// holds.
    pub(crate) async fn force_rollback_locked(&self, id: Uuid, reason: String) -> Result<Deployment, CanaryError> {
        let snapshot = {
            let deployments = self.deployments.read().await;
            deployments.get(&id).cloned().ok_or(CanaryError::NotFound(id))?
        };
        self.force_rollback(id, &snapshot, reason).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics_source::StubMetricSource;
    use crate::observability::MetricsConfig;
    use crate::router::InMemoryRouter;

    fn test_config() -> Arc<Config> {
        let yaml = r#"
global:
  errorBudget:
    availability: 99.9
    budgetWindowHours: 24
    burnRateThresholds: { warning: 3, critical: 6 }
  rollback:
    criteria:
      - { metric: error_rate, threshold: 0.05 }
      - { metric: latency_p95, threshold: 500 }
      - { metric: availability, threshold: 99.0 }
      - { metric: budget_burn_rate, threshold: 6 }
  stages:
    - { weight: 0.01, duration: "5m", minSampleSize: 100 }
    - { weight: 1.0, duration: "0m", minSampleSize: 0 }
services:
  api:
    enabled: true
"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, yaml).unwrap();
        Arc::new(Config::load(&path).unwrap())
    }

    fn test_controller() -> Arc<CanaryController> {
        let metrics = Arc::new(MetricsRegistry::new(MetricsConfig {
            enabled: true,
            endpoint: "/metrics".into(),
            port: None,
            include_process_metrics: false,
            latency_buckets: vec![0.1, 1.0],
        }).unwrap());

        Arc::new(CanaryController::new(
            test_config(),
            Arc::new(InMemoryRouter::new()),
            Arc::new(StubMetricSource::new()),
            NotificationDispatcher::new(vec![]),
            metrics,
        ))
    }

    #[tokio::test]
    async fn start_rejects_disabled_service() {
        let controller = test_controller();
        let err = controller.start("unknown-service", "v1", "us-east-1").await.unwrap_err();
        assert!(err.is_policy());
    }

    #[tokio::test]
    async fn start_creates_active_deployment_at_stage_zero_weight() {
        let controller = test_controller();
        let deployment = controller.start("api", "v1", "us-east-1").await.unwrap();
        assert_eq!(deployment.status, DeploymentStatus::Active);
        assert_eq!(deployment.current_weight, 0.01);

        let router_weight = controller.router().get_percentage("api", "us-east-1").await.unwrap();
        assert_eq!(router_weight, 0.01);
    }

    #[tokio::test]
    async fn rollback_zeroes_router_weight() {
        let controller = test_controller();
        let deployment = controller.start("api", "v1", "us-east-1").await.unwrap();
        let result = controller.rollback(deployment.id, "manual test rollback").await.unwrap();
        assert_eq!(result.status, DeploymentStatus::RolledBack);
        assert!(result.completed_at.is_some());

        let router_weight = controller.router().get_percentage("api", "us-east-1").await.unwrap();
        assert_eq!(router_weight, 0.0);
    }

    #[tokio::test]
    async fn manual_approval_path_pauses_instead_of_rolling_back() {
        let yaml = r#"
global:
  errorBudget: { availability: 99.9, budgetWindowHours: 24, burnRateThresholds: { warning: 3, critical: 6 } }
  rollback: { criteria: [] }
  stages: [{ weight: 0.01, duration: "5m", minSampleSize: 100 }, { weight: 1.0, duration: "0m", minSampleSize: 0 }]
services:
  api: { enabled: true, rollback: { manualApprovalRequired: true } }
"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, yaml).unwrap();
        let config = Arc::new(Config::load(&path).unwrap());

        let metrics = Arc::new(MetricsRegistry::new(MetricsConfig {
            enabled: true,
            endpoint: "/metrics".into(),
            port: None,
            include_process_metrics: false,
            latency_buckets: vec![0.1, 1.0],
        }).unwrap());

        let controller = Arc::new(CanaryController::new(
            config,
            Arc::new(InMemoryRouter::new()),
            Arc::new(StubMetricSource::new()),
            NotificationDispatcher::new(vec![]),
            metrics,
        ));

        let deployment = controller.start("api", "v1", "us-east-1").await.unwrap();
        let result = controller.rollback(deployment.id, "budget burn").await.unwrap();
        assert_eq!(result.status, DeploymentStatus::Paused);

        let confirmed = controller.confirm_rollback(deployment.id, "operator confirmed").await.unwrap();
        assert_eq!(confirmed.status, DeploymentStatus::RolledBack);
    }
}
