//! Seed scenario 3 (spec §8): a 99.9% SLO (0.1% budget) observing 99%
//! availability yields a burn rate of 10, past the configured critical
//! threshold of 6 — the budget-burn rollback rule fires even though no
//! individual metric crosses its own threshold.

use std::sync::Arc;
use std::time::Duration;

use progressive_delivery::canary::CanaryController;
use progressive_delivery::config::Config;
use progressive_delivery::domain::DeploymentStatus;
use progressive_delivery::metrics_source::StubMetricSource;
use progressive_delivery::notify::NotificationDispatcher;
use progressive_delivery::observability::{MetricsConfig, MetricsRegistry};
use progressive_delivery::router::{InMemoryRouter, TrafficRouter};

fn config() -> Arc<Config> {
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
    - { weight: 0.01, duration: "0m", minSampleSize: 100 }
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

fn metrics() -> Arc<MetricsRegistry> {
    Arc::new(
        MetricsRegistry::new(MetricsConfig {
            enabled: true,
            endpoint: "/metrics".into(),
            port: None,
            include_process_metrics: false,
            latency_buckets: vec![0.1, 1.0],
        })
        .unwrap(),
    )
}

#[tokio::test]
async fn burn_rate_past_critical_rolls_back_even_when_availability_is_above_its_own_threshold() {
    let source = StubMetricSource::new();
    // requestCount=1000, errorCount=10 -> availability = 99.0% exactly,
    // which does NOT trip the `availability < 99.0` rule on its own;
    // burnRate = (100 - 99.0) / 0.1 = 10, past the critical threshold of 6.
    source.set("request_count", 1000.0).await;
    source.set("error_count", 10.0).await;
    source.set("latency_p95", 80.0).await;

    let router = Arc::new(InMemoryRouter::new());
    let controller = Arc::new(CanaryController::new(
        config(),
        router.clone(),
        Arc::new(source),
        NotificationDispatcher::new(vec![]),
        metrics(),
    ));

    let deployment = controller.start("api", "v1", "us-east-1").await.unwrap();
    let _handle = controller.start_monitoring(Duration::from_millis(10)).await;

    let mut rolled_back = None;
    for _ in 0..200 {
        let d = controller.status(deployment.id).await.unwrap();
        if d.status.is_terminal() {
            rolled_back = Some(d);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    controller.stop_monitoring().await;

    let rolled_back = rolled_back.expect("deployment never rolled back within the polling window");
    assert_eq!(rolled_back.status, DeploymentStatus::RolledBack);
    assert_eq!(router.get_percentage("api", "us-east-1").await.unwrap(), 0.0);
}
