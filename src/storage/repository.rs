//! Repositories over the sqlx-backed domain types. Uses the runtime
//! `sqlx::query`/`query_as` API with `.bind(...)` rather than the
//! compile-time-checked `query!` macro family, since there is no
//! database available at build time to check against.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{ControlPlaneError, DeliveryJob, JobStatus, ProviderToken, Result};
use crate::storage::DatabasePool;

pub struct DeliveryJobRepository<'a> {
    pool: &'a DatabasePool,
}

impl<'a> DeliveryJobRepository<'a> {
    pub fn new(pool: &'a DatabasePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, job: &DeliveryJob) -> Result<()> {
        match self.pool {
            DatabasePool::Sqlite(p) => {
                sqlx::query(
                    "INSERT INTO delivery_jobs
                        (id, tenant, partner, payload, idempotency_key, attempts, max_attempts, status, last_error, last_attempt_at, next_eligible_at, created_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(job.id)
                .bind(&job.tenant)
                .bind(&job.partner)
                .bind(&job.payload)
                .bind(&job.idempotency_key)
                .bind(job.attempts)
                .bind(job.max_attempts)
                .bind(job.status)
                .bind(&job.last_error)
                .bind(job.last_attempt_at)
                .bind(job.next_eligible_at)
                .bind(job.created_at)
                .execute(p.pool())
                .await?;
            }
            #[cfg(feature = "postgres")]
            DatabasePool::Postgres(p) => {
                sqlx::query(
                    "INSERT INTO delivery_jobs
                        (id, tenant, partner, payload, idempotency_key, attempts, max_attempts, status, last_error, last_attempt_at, next_eligible_at, created_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
                )
                .bind(job.id)
                .bind(&job.tenant)
                .bind(&job.partner)
                .bind(&job.payload)
                .bind(&job.idempotency_key)
                .bind(job.attempts)
                .bind(job.max_attempts)
                .bind(job.status)
                .bind(&job.last_error)
                .bind(job.last_attempt_at)
                .bind(job.next_eligible_at)
                .bind(job.created_at)
                .execute(p.pool())
                .await?;
            }
        }
        Ok(())
    }

    pub async fn update(&self, job: &DeliveryJob) -> Result<()> {
        match self.pool {
            DatabasePool::Sqlite(p) => {
                sqlx::query(
                    "UPDATE delivery_jobs SET attempts = ?, status = ?, last_error = ?, last_attempt_at = ?, next_eligible_at = ? WHERE id = ?",
                )
                .bind(job.attempts)
                .bind(job.status)
                .bind(&job.last_error)
                .bind(job.last_attempt_at)
                .bind(job.next_eligible_at)
                .bind(job.id)
                .execute(p.pool())
                .await?;
            }
            #[cfg(feature = "postgres")]
            DatabasePool::Postgres(p) => {
                sqlx::query(
                    "UPDATE delivery_jobs SET attempts = $1, status = $2, last_error = $3, last_attempt_at = $4, next_eligible_at = $5 WHERE id = $6",
                )
                .bind(job.attempts)
                .bind(job.status)
                .bind(&job.last_error)
                .bind(job.last_attempt_at)
                .bind(job.next_eligible_at)
                .bind(job.id)
                .execute(p.pool())
                .await?;
            }
        }
        Ok(())
    }

    pub async fn find_by_idempotency_key(
        &self,
        tenant: &str,
        partner: &str,
        key: &str,
    ) -> Result<Option<DeliveryJob>> {
        let row = match self.pool {
            DatabasePool::Sqlite(p) => {
                sqlx::query_as::<_, DeliveryJob>(
                    "SELECT * FROM delivery_jobs WHERE tenant = ? AND partner = ? AND idempotency_key = ?",
                )
                .bind(tenant)
                .bind(partner)
                .bind(key)
                .fetch_optional(p.pool())
                .await?
            }
            #[cfg(feature = "postgres")]
            DatabasePool::Postgres(p) => {
                sqlx::query_as::<_, DeliveryJob>(
                    "SELECT * FROM delivery_jobs WHERE tenant = $1 AND partner = $2 AND idempotency_key = $3",
                )
                .bind(tenant)
                .bind(partner)
                .bind(key)
                .fetch_optional(p.pool())
                .await?
            }
        };
        Ok(row)
    }

    /// Jobs eligible for automatic retry redrive: `pending` only —
    /// `failed` is the permanent-error terminal state and only leaves it
    /// through an operator-initiated replay, never the automatic path.
    pub async fn due_for_retry(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<DeliveryJob>> {
        let rows = match self.pool {
            DatabasePool::Sqlite(p) => {
                sqlx::query_as::<_, DeliveryJob>(
                    "SELECT * FROM delivery_jobs WHERE status = 'pending' AND next_eligible_at <= ? ORDER BY next_eligible_at ASC LIMIT ?",
                )
                .bind(now)
                .bind(limit)
                .fetch_all(p.pool())
                .await?
            }
            #[cfg(feature = "postgres")]
            DatabasePool::Postgres(p) => {
                sqlx::query_as::<_, DeliveryJob>(
                    "SELECT * FROM delivery_jobs WHERE status = 'pending' AND next_eligible_at <= $1 ORDER BY next_eligible_at ASC LIMIT $2",
                )
                .bind(now)
                .bind(limit)
                .fetch_all(p.pool())
                .await?
            }
        };
        Ok(rows)
    }

    pub async fn get(&self, id: Uuid) -> Result<DeliveryJob> {
        let row = match self.pool {
            DatabasePool::Sqlite(p) => {
                sqlx::query_as::<_, DeliveryJob>("SELECT * FROM delivery_jobs WHERE id = ?")
                    .bind(id)
                    .fetch_optional(p.pool())
                    .await?
            }
            #[cfg(feature = "postgres")]
            DatabasePool::Postgres(p) => {
                sqlx::query_as::<_, DeliveryJob>("SELECT * FROM delivery_jobs WHERE id = $1")
                    .bind(id)
                    .fetch_optional(p.pool())
                    .await?
            }
        };
        row.ok_or_else(|| ControlPlaneError::NotFound(format!("delivery job {id}")))
    }

    pub async fn list_dead(&self) -> Result<Vec<DeliveryJob>> {
        let rows = match self.pool {
            DatabasePool::Sqlite(p) => {
                sqlx::query_as::<_, DeliveryJob>("SELECT * FROM delivery_jobs WHERE status = ? ORDER BY created_at DESC")
                    .bind(JobStatus::Dead)
                    .fetch_all(p.pool())
                    .await?
            }
            #[cfg(feature = "postgres")]
            DatabasePool::Postgres(p) => {
                sqlx::query_as::<_, DeliveryJob>("SELECT * FROM delivery_jobs WHERE status = $1 ORDER BY created_at DESC")
                    .bind(JobStatus::Dead)
                    .fetch_all(p.pool())
                    .await?
            }
        };
        Ok(rows)
    }
}

pub struct ProviderTokenRepository<'a> {
    pool: &'a DatabasePool,
}

impl<'a> ProviderTokenRepository<'a> {
    pub fn new(pool: &'a DatabasePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, tenant: &str, partner: &str) -> Result<Option<ProviderToken>> {
        let row = match self.pool {
            DatabasePool::Sqlite(p) => {
                sqlx::query_as::<_, ProviderToken>(
                    "SELECT tenant, partner, access_token, token_type, expires_at FROM provider_tokens WHERE tenant = ? AND partner = ?",
                )
                .bind(tenant)
                .bind(partner)
                .fetch_optional(p.pool())
                .await?
            }
            #[cfg(feature = "postgres")]
            DatabasePool::Postgres(p) => {
                sqlx::query_as::<_, ProviderToken>(
                    "SELECT tenant, partner, access_token, token_type, expires_at FROM provider_tokens WHERE tenant = $1 AND partner = $2",
                )
                .bind(tenant)
                .bind(partner)
                .fetch_optional(p.pool())
                .await?
            }
        };
        Ok(row)
    }

    pub async fn delete(&self, tenant: &str, partner: &str) -> Result<()> {
        match self.pool {
            DatabasePool::Sqlite(p) => {
                sqlx::query("DELETE FROM provider_tokens WHERE tenant = ? AND partner = ?")
                    .bind(tenant)
                    .bind(partner)
                    .execute(p.pool())
                    .await?;
            }
            #[cfg(feature = "postgres")]
            DatabasePool::Postgres(p) => {
                sqlx::query("DELETE FROM provider_tokens WHERE tenant = $1 AND partner = $2")
                    .bind(tenant)
                    .bind(partner)
                    .execute(p.pool())
                    .await?;
            }
        }
        Ok(())
    }

    pub async fn upsert(&self, token: &ProviderToken) -> Result<()> {
        match self.pool {
            DatabasePool::Sqlite(p) => {
                sqlx::query(
                    "INSERT INTO provider_tokens (tenant, partner, access_token, token_type, expires_at)
                     VALUES (?, ?, ?, ?, ?)
                     ON CONFLICT (tenant, partner) DO UPDATE SET access_token = excluded.access_token, token_type = excluded.token_type, expires_at = excluded.expires_at",
                )
                .bind(&token.tenant)
                .bind(&token.partner)
                .bind(&token.access_token)
                .bind(&token.token_type)
                .bind(token.expires_at)
                .execute(p.pool())
                .await?;
            }
            #[cfg(feature = "postgres")]
            DatabasePool::Postgres(p) => {
                sqlx::query(
                    "INSERT INTO provider_tokens (tenant, partner, access_token, token_type, expires_at)
                     VALUES ($1, $2, $3, $4, $5)
                     ON CONFLICT (tenant, partner) DO UPDATE SET access_token = excluded.access_token, token_type = excluded.token_type, expires_at = excluded.expires_at",
                )
                .bind(&token.tenant)
                .bind(&token.partner)
                .bind(&token.access_token)
                .bind(&token.token_type)
                .bind(token.expires_at)
                .execute(p.pool())
                .await?;
            }
        }
        Ok(())
    }
}

pub struct CachedResponseRepository<'a> {
    pool: &'a DatabasePool,
}

impl<'a> CachedResponseRepository<'a> {
    pub fn new(pool: &'a DatabasePool) -> Self {
        Self { pool }
    }

    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let affected = match self.pool {
            DatabasePool::Sqlite(p) => {
                sqlx::query("DELETE FROM cached_responses WHERE expires_at <= ?")
                    .bind(now)
                    .execute(p.pool())
                    .await?
                    .rows_affected()
            }
            #[cfg(feature = "postgres")]
            DatabasePool::Postgres(p) => {
                sqlx::query("DELETE FROM cached_responses WHERE expires_at <= $1")
                    .bind(now)
                    .execute(p.pool())
                    .await?
                    .rows_affected()
            }
        };
        Ok(affected)
    }
}
