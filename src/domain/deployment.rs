//! Deployment, Stage, Metrics and ErrorBudget — the canary data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

/// One row of a service's progressive-rollout table. Immutable config,
/// consulted but never mutated by the controller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Stage {
    /// Traffic fraction in `[0, 1]`. The last stage's weight is 1.0.
    pub weight: f64,
    /// Minimum dwell time before the stage is eligible to advance.
    pub min_duration: chrono::Duration,
    /// Minimum observed sample size before the stage is eligible to advance.
    pub min_sample_size: u64,
}

/// Lifecycle state of a `Deployment`. Terminal: `Completed`, `RolledBack`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Initializing,
    Active,
    Paused,
    Completed,
    RolledBack,
}

impl DeploymentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::RolledBack)
    }
}

/// Observable metrics for a deployment at a point in time. Derived
/// quantities, never persisted as truth — always recomputed from the
/// metric source adapter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct Metrics {
    pub request_count: u64,
    pub error_count: u64,
    pub error_rate: f64,
    pub latency_p50_ms: f64,
    pub latency_p95_ms: f64,
    pub latency_p99_ms: f64,
    pub availability_pct: f64,
}

impl Metrics {
    /// Build metrics from the raw observed counters, applying the
    /// zero-request-window boundary behaviour: `errorRate = 0`,
    /// `availability = 100` when `requestCount == 0`.
    pub fn from_counts(
        request_count: u64,
        error_count: u64,
        p50: f64,
        p95: f64,
        p99: f64,
    ) -> Self {
        let (error_rate, availability_pct) = if request_count == 0 {
            (0.0, 100.0)
        } else {
            let error_rate = error_count as f64 / request_count as f64;
            let availability_pct =
                100.0 * (request_count - error_count.min(request_count)) as f64 / request_count as f64;
            (error_rate, availability_pct)
        };

        Self {
            request_count,
            error_count,
            error_rate,
            latency_p50_ms: p50,
            latency_p95_ms: p95,
            latency_p99_ms: p99,
            availability_pct,
        }
    }
}

/// Bucketed health of the error budget for the current window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BudgetStatus {
    Healthy,
    Warning,
    Critical,
    Exhausted,
}

/// `{totalPct, consumedPct, remainingPct, burnRate, status}` — derived
/// from `(1 − SLO)` over the rolling window, reduced by observed
/// unavailability.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ErrorBudget {
    pub total_pct: f64,
    pub consumed_pct: f64,
    pub remaining_pct: f64,
    pub burn_rate: f64,
    pub status: BudgetStatus,
}

impl ErrorBudget {
    /// Compute the error budget for an observed `availability_pct` against
    /// an SLO and burn-rate thresholds.
    ///
    /// The burn-rate formula is taken literally from the specification
    /// (`consumed / totalBudget`), per the documented open question in
    /// DESIGN.md — it is not the multi-window SRE burn rate.
    pub fn compute(availability_pct: f64, slo_pct: f64, warning: f64, critical: f64) -> Self {
        let total_pct = (100.0 - slo_pct).max(0.0);
        let consumed_pct = (100.0 - availability_pct).max(0.0);
        let remaining_pct = (total_pct - consumed_pct).max(0.0);
        let burn_rate = if total_pct > 0.0 {
            consumed_pct / total_pct
        } else {
            0.0
        };

        let status = if remaining_pct <= 0.0 {
            BudgetStatus::Exhausted
        } else if burn_rate > critical {
            BudgetStatus::Critical
        } else if burn_rate > warning {
            BudgetStatus::Warning
        } else {
            BudgetStatus::Healthy
        };

        Self {
            total_pct,
            consumed_pct,
            remaining_pct,
            burn_rate,
            status,
        }
    }
}

/// A single recorded state transition, kept for operator visibility
/// (`cli status --json`) without re-deriving it from logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentHistoryEntry {
    pub from_status: DeploymentStatus,
    pub to_status: DeploymentStatus,
    pub at: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Owned exclusively by its monitor tick (or a briefly-synchronized
/// operator call); see the canary controller's concurrency invariant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: Uuid,
    pub service: String,
    pub version: String,
    pub region: String,
    pub status: DeploymentStatus,
    pub current_stage: usize,
    pub current_weight: f64,
    pub started_at: DateTime<Utc>,
    pub last_transition_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub metrics: Metrics,
    pub error_budget: ErrorBudget,
    #[serde(skip)]
    pub history: VecDeque<DeploymentHistoryEntry>,
}

const HISTORY_CAPACITY: usize = 64;

impl Deployment {
    pub fn new(service: String, version: String, region: String, stage0: Stage) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            service,
            version,
            region,
            status: DeploymentStatus::Initializing,
            current_stage: 0,
            current_weight: stage0.weight,
            started_at: now,
            last_transition_at: now,
            completed_at: None,
            metrics: Metrics::default(),
            error_budget: ErrorBudget::compute(100.0, 99.9, 1.0, 2.0),
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    /// Record and apply a state transition, maintaining the invariant
    /// `status ∈ {completed, rolled_back} ⇒ completedAt set`.
    pub fn transition(&mut self, to: DeploymentStatus, reason: Option<String>) {
        let from = self.status;
        let at = Utc::now();

        if to.is_terminal() {
            self.completed_at = Some(at);
        }
        self.status = to;
        self.last_transition_at = at;

        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(DeploymentHistoryEntry {
            from_status: from,
            to_status: to,
            at,
            reason,
        });
    }
}
