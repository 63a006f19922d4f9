//! DeliveryJob — the unit of work owned by the delivery orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `{pending, in_flight, delivered, failed, dead}`. Transitioning to
/// `Delivered` freezes `payload`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InFlight,
    Delivered,
    Failed,
    Dead,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeliveryJob {
    pub id: Uuid,
    pub tenant: String,
    pub partner: String,
    pub payload: serde_json::Value,
    pub idempotency_key: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub status: JobStatus,
    pub last_error: Option<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub next_eligible_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl DeliveryJob {
    pub fn new(
        tenant: impl Into<String>,
        partner: impl Into<String>,
        payload: serde_json::Value,
        idempotency_key: impl Into<String>,
        max_attempts: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant: tenant.into(),
            partner: partner.into(),
            payload,
            idempotency_key: idempotency_key.into(),
            attempts: 0,
            max_attempts,
            status: JobStatus::Pending,
            last_error: None,
            last_attempt_at: None,
            next_eligible_at: now,
            created_at: now,
        }
    }

    /// Invariant: `attempts <= max_attempts`.
    pub fn has_attempts_remaining(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Reset for a forced replay: frozen payload is copied forward,
    /// attempts reset to zero. Keeps the same `id` — the row is unique
    /// on `(tenant, partner, idempotency_key)`, so a replay updates the
    /// existing row in place rather than inserting a second one that
    /// would collide with that constraint.
    pub fn replay(&self) -> Self {
        let mut copy = self.clone();
        copy.attempts = 0;
        copy.status = JobStatus::Pending;
        copy.last_error = None;
        copy.last_attempt_at = None;
        copy.next_eligible_at = Utc::now();
        copy
    }
}
