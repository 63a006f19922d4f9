//! Operator-facing YAML configuration, layered with environment overrides.
//!
//! Mirrors the schema in §6 of the specification: global error-budget and
//! rollback policy, per-service overrides, stages, feature-flag provider,
//! monitoring cadence, and notification channels.

mod duration;

pub use duration::parse_duration;

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::domain::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub global: GlobalConfig,
    #[serde(default)]
    pub services: HashMap<String, ServiceConfig>,
    #[serde(default)]
    pub feature_flags: FeatureFlagConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub observability: crate::observability::ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalConfig {
    pub error_budget: ErrorBudgetConfig,
    pub rollback: RollbackConfig,
    pub stages: Vec<StageConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBudgetConfig {
    /// SLO percent, e.g. 99.9.
    pub availability: f64,
    #[serde(default = "default_budget_window_hours")]
    pub budget_window_hours: u32,
    pub burn_rate_thresholds: BurnRateThresholds,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BurnRateThresholds {
    pub warning: f64,
    pub critical: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackConfig {
    pub criteria: Vec<RollbackCriterion>,
}

/// One rollback-gate rule. Rules are evaluated in declared order;
/// first match wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackCriterion {
    pub metric: RollbackMetric,
    pub threshold: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RollbackMetric {
    ErrorRate,
    LatencyP95,
    Availability,
    BudgetBurnRate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageConfig {
    pub weight: f64,
    /// Duration string matching `^\d+(m|h)$`.
    pub duration: String,
    pub min_sample_size: u64,
}

impl StageConfig {
    pub fn to_stage(&self) -> Result<crate::domain::Stage> {
        let min_duration = parse_duration(&self.duration)
            .map_err(|e| crate::domain::ControlPlaneError::config(e.to_string()))?;
        Ok(crate::domain::Stage {
            weight: self.weight.clamp(0.0, 1.0),
            min_duration,
            min_sample_size: self.min_sample_size,
        })
    }
}

fn default_budget_window_hours() -> u32 {
    24
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    #[serde(default)]
    pub enabled: bool,
    pub stages: Option<Vec<StageConfig>>,
    #[serde(default)]
    pub rollback: ServiceRollbackConfig,
    /// Regions this service's canary is permitted to run in. Empty means
    /// "all regions permitted".
    #[serde(default)]
    pub allowed_regions: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRollbackConfig {
    #[serde(default)]
    pub manual_approval_required: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureFlagConfig {
    #[serde(default = "default_ff_provider")]
    pub provider: String,
}

fn default_ff_provider() -> String {
    "in-memory".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringConfig {
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
        }
    }
}

fn default_tick_interval_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationsConfig {
    pub slack: Option<SlackConfig>,
    pub pagerduty: Option<PagerDutyConfig>,
    pub email: Option<EmailNotifyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    pub enabled: bool,
    pub channels: Vec<ChannelFilter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PagerDutyConfig {
    pub enabled: bool,
    pub integration_key: String,
    pub events: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailNotifyConfig {
    pub enabled: bool,
    pub recipients: Vec<String>,
    pub events: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelFilter {
    pub name: String,
    /// Event kinds this channel subscribes to, or `["all"]` for wildcard.
    pub events: Vec<String>,
}

impl ChannelFilter {
    pub fn matches(&self, kind: &str) -> bool {
        self.events.iter().any(|e| e == "all" || e == kind)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            pool_size: default_pool_size(),
            run_migrations: default_run_migrations(),
        }
    }
}

fn default_database_url() -> String {
    "sqlite::memory:".to_string()
}

fn default_pool_size() -> u32 {
    10
}

fn default_run_migrations() -> bool {
    true
}

impl Config {
    /// Load the YAML config file, then layer environment overrides on
    /// top (matching the `Figment` layering pattern: file, then `Env`).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let figment = Figment::new()
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("CONTROL_PLANE_").split("__"));

        figment
            .extract()
            .map_err(|e| crate::domain::ControlPlaneError::config(e.to_string()))
    }

    /// Resolve the effective stage list for a service: the service's own
    /// override if present, otherwise the global stages.
    pub fn stages_for(&self, service: &str) -> Result<Vec<crate::domain::Stage>> {
        let stage_configs = self
            .services
            .get(service)
            .and_then(|s| s.stages.clone())
            .unwrap_or_else(|| self.global.stages.clone());

        stage_configs.iter().map(StageConfig::to_stage).collect()
    }

    pub fn service_enabled(&self, service: &str) -> bool {
        self.services.get(service).map(|s| s.enabled).unwrap_or(false)
    }

    pub fn region_allowed(&self, service: &str, region: &str) -> bool {
        match self.services.get(service) {
            Some(cfg) if !cfg.allowed_regions.is_empty() => {
                cfg.allowed_regions.iter().any(|r| r == region)
            }
            _ => true,
        }
    }

    pub fn manual_approval_required(&self, service: &str) -> bool {
        self.services
            .get(service)
            .map(|s| s.rollback.manual_approval_required)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_yaml() -> &'static str {
        r#"
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
    - { weight: 0.05, duration: "5m", minSampleSize: 100 }
    - { weight: 0.25, duration: "10m", minSampleSize: 500 }
    - { weight: 1.0, duration: "0m", minSampleSize: 0 }
services:
  api:
    enabled: true
    rollback: { manualApprovalRequired: false }
"#
    }

    #[test]
    fn loads_full_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_yaml().as_bytes()).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.global.error_budget.availability, 99.9);
        assert_eq!(config.global.stages.len(), 4);
        assert!(config.service_enabled("api"));
        assert!(!config.service_enabled("unknown"));

        let stages = config.stages_for("api").unwrap();
        assert_eq!(stages.len(), 4);
        assert_eq!(stages.last().unwrap().weight, 1.0);
    }
}
