//! Component F — Delivery Orchestrator.
//!
//! `deliver(record, partner, tenant)` runs the five-step pipeline from
//! §4.F, each step its own failure boundary: validate, resolve tenant
//! policy, check the idempotency cache, send through the partner
//! client, persist the outcome. Jobs sharing a `(tenant, partner,
//! idempotency_key)` serialize through a keyed lock identical in shape
//! to the token store's single-flight; jobs across different keys run
//! concurrently.
//!
//! A transient partner failure leaves its job `pending` with a
//! `next_eligible_at`. `spawn_retry_loop` ticks `drain_due_retries`,
//! which pulls everything due and resends it through a `JoinSet`
//! bounded to a configured concurrency — the worker pool behind
//! automatic redrive.

pub mod partners;

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{DeliveryJob, JobStatus, NotificationEvent, NotificationSubject, Severity};
use crate::idempotency::{IdempotencyCache, IdempotencyStore};
use crate::notify::NotificationDispatcher;
use crate::observability::MetricsRegistry;
use crate::storage::{DatabasePool, DeliveryJobRepository};
use crate::tokens::TokenStore;
use partners::{PartnerClient, PartnerError, PartnerRequest, RetryPolicy};

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("payload failed shape validation: {0}")]
    Validation(String),
    #[error("tenant '{0}' is not permitted to use partner '{1}'")]
    PolicyDenied(String, String),
    #[error(transparent)]
    Partner(#[from] PartnerError),
    #[error(transparent)]
    Cache(#[from] crate::idempotency::CacheError),
    #[error(transparent)]
    Token(#[from] crate::tokens::TokenError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("unknown partner kind '{0}'")]
    UnknownPartner(String),
    #[error("job '{0}' not found")]
    JobNotFound(Uuid),
    #[error(transparent)]
    Repository(#[from] crate::domain::ControlPlaneError),
}

/// Per-tenant policy: which partners it may use, and which fields in
/// the payload must be redacted before the idempotency key is derived
/// (§4.E: "PII subject to redaction rules must be transformed before
/// the hash is computed").
#[derive(Debug, Clone, Default)]
pub struct TenantPolicy {
    pub allowed_partners: Vec<String>,
    pub redact_fields: Vec<String>,
}

impl TenantPolicy {
    pub fn allows(&self, partner: &str) -> bool {
        self.allowed_partners.is_empty() || self.allowed_partners.iter().any(|p| p == partner)
    }

    /// Strips configured PII fields (recursively, at any object depth)
    /// so the cache key is stable across redacted/raw forms of the
    /// same logical record.
    pub fn redact(&self, payload: &serde_json::Value) -> serde_json::Value {
        redact_value(payload, &self.redact_fields)
    }
}

fn redact_value(value: &serde_json::Value, fields: &[String]) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                if fields.iter().any(|f| f == k) {
                    continue;
                }
                out.insert(k.clone(), redact_value(v, fields));
            }
            serde_json::Value::Object(out)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(|v| redact_value(v, fields)).collect())
        }
        other => other.clone(),
    }
}

/// Outcome of one `deliver` call, surfaced to the caller (operator
/// CLI, an inbound ingestion handler, or a replay).
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub job: DeliveryJob,
    pub from_cache: bool,
}

/// Resolves tenant policy. A trivial static map is enough for the
/// in-scope surface here — a real deployment would back this with the
/// config service named as an external collaborator in §1.
pub trait TenantPolicyResolver: Send + Sync {
    fn resolve(&self, tenant: &str) -> TenantPolicy;
}

#[derive(Clone, Default)]
pub struct StaticTenantPolicyResolver {
    policies: HashMap<String, TenantPolicy>,
}

impl StaticTenantPolicyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(mut self, tenant: impl Into<String>, policy: TenantPolicy) -> Self {
        self.policies.insert(tenant.into(), policy);
        self
    }
}

impl TenantPolicyResolver for StaticTenantPolicyResolver {
    fn resolve(&self, tenant: &str) -> TenantPolicy {
        self.policies.get(tenant).cloned().unwrap_or_default()
    }
}

const DEFAULT_MAX_ATTEMPTS: i32 = 3;
/// §5: every external call carries a deadline. Exceeding it is treated
/// as a transient partner error so it flows through the existing
/// retry/dead-letter classification rather than hanging the caller.
const SEND_DEADLINE: Duration = Duration::from_secs(15);
/// Jobs pulled per `drain_due_retries` tick. Bounds how much one tick
/// can fan out regardless of how many jobs are actually due.
const RETRY_DRAIN_BATCH_LIMIT: i64 = 64;

/// Owns the partner client registry, the keyed per-idempotency-key
/// exclusion locks, and the repositories backing delivery jobs.
pub struct DeliveryOrchestrator<S: IdempotencyStore> {
    pool: DatabasePool,
    clients: HashMap<String, Arc<dyn PartnerClient>>,
    tokens: Arc<TokenStore>,
    cache: Arc<IdempotencyCache<S>>,
    policy_resolver: Arc<dyn TenantPolicyResolver>,
    notifier: NotificationDispatcher,
    metrics: Arc<MetricsRegistry>,
    retry_policy: RetryPolicy,
    key_locks: Mutex<HashMap<(String, String, String), Arc<Mutex<()>>>>,
    cancellation: CancellationToken,
    send_deadline: Duration,
}

impl<S: IdempotencyStore> DeliveryOrchestrator<S> {
    pub fn new(
        pool: DatabasePool,
        tokens: Arc<TokenStore>,
        cache: Arc<IdempotencyCache<S>>,
        policy_resolver: Arc<dyn TenantPolicyResolver>,
        notifier: NotificationDispatcher,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            pool,
            clients: HashMap::new(),
            tokens,
            cache,
            policy_resolver,
            notifier,
            metrics,
            retry_policy: RetryPolicy::default(),
            key_locks: Mutex::new(HashMap::new()),
            cancellation: CancellationToken::new(),
            send_deadline: SEND_DEADLINE,
        }
    }

    pub fn with_client(mut self, partner: impl Into<String>, client: Arc<dyn PartnerClient>) -> Self {
        self.clients.insert(partner.into(), client);
        self
    }

    /// A clone of the orchestrator's cancellation token, for a caller
    /// that wants to observe (but not trigger) a shutdown.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Cancels any in-flight `attempt_send` calls. A cancelled send is
    /// classified as a transient failure, so it falls back to the
    /// ordinary retry/dead-letter path rather than corrupting job state.
    pub fn shutdown(&self) {
        self.cancellation.cancel();
    }

    async fn lock_for(&self, tenant: &str, partner: &str, key: &str) -> Arc<Mutex<()>> {
        let lock_key = (tenant.to_string(), partner.to_string(), key.to_string());
        let mut locks = self.key_locks.lock().await;
        locks.entry(lock_key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    fn notify_subject(job: &DeliveryJob) -> NotificationSubject {
        NotificationSubject::Delivery {
            id: job.id,
            tenant: job.tenant.clone(),
            partner: job.partner.clone(),
        }
    }

    /// Validate shape, resolve policy, check the cache, and — on a
    /// miss — send through the partner client, persisting the outcome
    /// at every failure boundary named in §4.F.
    ///
    /// Jobs for the same `(tenant, partner, idempotency_key)` serialize
    /// through a keyed lock; different keys run fully concurrently.
    pub async fn deliver(
        &self,
        tenant: &str,
        partner: &str,
        payload: serde_json::Value,
        idempotency_key: Option<String>,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        // Step 1: shape validation. A record must at minimum be a JSON object.
        if !payload.is_object() {
            let job = DeliveryJob::new(tenant, partner, payload, idempotency_key.unwrap_or_default(), 0);
            let mut job = job;
            job.status = JobStatus::Dead;
            job.last_error = Some("payload is not a JSON object".to_string());
            self.notifier
                .dispatch(NotificationEvent::new(
                    "validation_error",
                    Self::notify_subject(&job),
                    Severity::Critical,
                    "delivery rejected: payload failed shape validation",
                ))
                .await;
            return Err(DeliveryError::Validation("payload is not a JSON object".to_string()));
        }

        // Step 2: resolve tenant policy (allowed partners, PII redaction rules).
        let policy = self.policy_resolver.resolve(tenant);
        if !policy.allows(partner) {
            return Err(DeliveryError::PolicyDenied(tenant.to_string(), partner.to_string()));
        }
        let redacted = policy.redact(&payload);

        let key = idempotency_key.unwrap_or_else(|| crate::idempotency::derive_key(partner, &redacted));
        let lock = self.lock_for(tenant, partner, &key).await;
        let _guard = lock.lock().await;

        let repo = DeliveryJobRepository::new(&self.pool);
        let mut job = match repo.find_by_idempotency_key(tenant, partner, &key).await? {
            Some(existing) => existing,
            None => {
                let job = DeliveryJob::new(tenant, partner, payload.clone(), key.clone(), DEFAULT_MAX_ATTEMPTS);
                repo.insert(&job).await?;
                job
            }
        };

        if job.status == JobStatus::Delivered {
            return Ok(DeliveryOutcome { job, from_cache: true });
        }

        // Step 3: idempotency cache lookup.
        if let Some(cached) = self.cache.lookup(partner, &redacted).await {
            job.status = JobStatus::Delivered;
            job.last_attempt_at = Some(Utc::now());
            repo.update(&job).await?;
            self.metrics.delivery_delivered_total.with_label_values(&[partner, "cache"]).inc();
            info!(tenant, partner, idempotency_key = %key, "delivery served from idempotency cache");
            let _ = cached;
            return Ok(DeliveryOutcome { job, from_cache: true });
        }

        // Step 4: send through the partner client.
        self.attempt_send(&repo, &mut job, &redacted, partner).await?;

        Ok(DeliveryOutcome { job, from_cache: false })
    }

    async fn attempt_send(
        &self,
        repo: &DeliveryJobRepository<'_>,
        job: &mut DeliveryJob,
        redacted_payload: &serde_json::Value,
        partner: &str,
    ) -> Result<(), DeliveryError> {
        let client = self
            .clients
            .get(partner)
            .cloned()
            .ok_or_else(|| DeliveryError::UnknownPartner(partner.to_string()))?;

        let mut forced_refresh = false;
        loop {
            let token = self.tokens.get_valid(&job.tenant, partner).await?;

            job.status = JobStatus::InFlight;
            job.attempts += 1;
            job.last_attempt_at = Some(Utc::now());
            repo.update(job).await?;
            self.metrics.delivery_attempts_total.with_label_values(&[partner]).inc();

            let request = PartnerRequest {
                tenant: job.tenant.clone(),
                idempotency_key: job.idempotency_key.clone(),
                payload: redacted_payload.clone(),
            };

            let timer = crate::observability::metrics::start_timer(
                &self.metrics.partner_request_duration_seconds.with_label_values(&[partner]),
            );
            let send_fut = client.send(&token.access_token, &request);
            let result = tokio::select! {
                res = tokio::time::timeout(self.send_deadline, send_fut) => res.unwrap_or_else(|_| {
                    warn!(tenant = %job.tenant, partner, "partner send exceeded its deadline, leaving job state for the retry path");
                    Err(PartnerError::Transient {
                        partner: partner.to_string(),
                        message: "send deadline exceeded".to_string(),
                    })
                }),
                _ = self.cancellation.cancelled() => {
                    warn!(tenant = %job.tenant, partner, "delivery orchestrator shutting down, aborting in-flight send");
                    Err(PartnerError::Transient {
                        partner: partner.to_string(),
                        message: "orchestrator shutting down".to_string(),
                    })
                }
            };
            timer.observe_duration();

            match result {
                Ok(response) => {
                    job.status = JobStatus::Delivered;
                    job.last_error = None;
                    repo.update(job).await?;

                    self.cache
                        .store(partner, redacted_payload, response.body.clone())
                        .await
                        .ok();
                    self.metrics.delivery_delivered_total.with_label_values(&[partner, "live"]).inc();
                    info!(tenant = %job.tenant, partner, idempotency_key = %job.idempotency_key, "delivery succeeded");
                    return Ok(());
                }
                Err(PartnerError::Auth { .. }) if !forced_refresh => {
                    forced_refresh = true;
                    warn!(tenant = %job.tenant, partner, "auth error, forcing one token refresh then a single retry");
                    self.tokens.invalidate(&job.tenant, partner).await.ok();
                    continue;
                }
                Err(e) if e.is_retryable() && job.has_attempts_remaining() => {
                    let delay = self.retry_policy.delay_for((job.attempts - 1) as u32);
                    job.status = JobStatus::Pending;
                    job.last_error = Some(e.to_string());
                    job.next_eligible_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
                    repo.update(job).await?;
                    warn!(tenant = %job.tenant, partner, attempts = job.attempts, error = %e, "transient delivery failure, scheduled for retry");
                    return Ok(());
                }
                Err(e) if e.is_permanent() => {
                    job.status = JobStatus::Failed;
                    job.last_error = Some(e.to_string());
                    repo.update(job).await?;
                    self.metrics.delivery_failed_total.with_label_values(&[partner]).inc();
                    self.notifier
                        .dispatch(NotificationEvent::new(
                            "delivery_failed",
                            Self::notify_subject(job),
                            Severity::Warning,
                            format!("permanent delivery failure: {e}"),
                        ))
                        .await;
                    return Err(e.into());
                }
                Err(e) => {
                    // Retryable but attempts exhausted, or a forced-refresh
                    // retry that still failed with auth — in both cases the
                    // job has run out of road.
                    job.status = JobStatus::Dead;
                    job.last_error = Some(e.to_string());
                    repo.update(job).await?;
                    self.metrics.delivery_dead_total.with_label_values(&[partner]).inc();
                    self.notifier
                        .dispatch(NotificationEvent::new(
                            "delivery_dead",
                            Self::notify_subject(job),
                            Severity::Critical,
                            format!("delivery exhausted retries: {e}"),
                        ))
                        .await;
                    return Err(e.into());
                }
            }
        }
    }

    /// Replays a dead/failed job: copies the frozen payload forward
    /// with `attempts` reset to zero, bypassing the idempotency cache
    /// only if the operator explicitly forces it.
    pub async fn replay(&self, job_id: Uuid, force: bool) -> Result<DeliveryOutcome, DeliveryError> {
        let repo = DeliveryJobRepository::new(&self.pool);
        let original = repo.get(job_id).await.map_err(|_| DeliveryError::JobNotFound(job_id))?;

        let policy = self.policy_resolver.resolve(&original.tenant);
        let redacted = policy.redact(&original.payload);

        if force {
            self.cache.invalidate(&original.partner, &redacted).await.ok();
        }

        let mut replayed = original.replay();
        repo.update(&replayed).await?;

        let lock = self.lock_for(&replayed.tenant, &replayed.partner, &replayed.idempotency_key).await;
        let _guard = lock.lock().await;

        if !force {
            if let Some(cached) = self.cache.lookup(&replayed.partner, &redacted).await {
                replayed.status = JobStatus::Delivered;
                repo.update(&replayed).await?;
                let _ = cached;
                return Ok(DeliveryOutcome { job: replayed, from_cache: true });
            }
        }

        let partner = replayed.partner.clone();
        self.attempt_send(&repo, &mut replayed, &redacted, &partner).await?;
        self.metrics.delivery_replays_total.with_label_values(&[&partner]).inc();

        Ok(DeliveryOutcome { job: replayed, from_cache: false })
    }
}

impl<S: IdempotencyStore + 'static> DeliveryOrchestrator<S> {
    /// Pulls every job `due_for_retry` and resends each through its
    /// partner client, bounded to `concurrency` concurrent sends via a
    /// `JoinSet` — jobs on different keys redrive concurrently the same
    /// way `deliver` does. Returns the number of jobs dispatched.
    pub async fn drain_due_retries(self: &Arc<Self>, concurrency: usize) -> Result<usize, DeliveryError> {
        let repo = DeliveryJobRepository::new(&self.pool);
        let due = repo.due_for_retry(Utc::now(), RETRY_DRAIN_BATCH_LIMIT).await?;

        let mut inflight: JoinSet<()> = JoinSet::new();
        let dispatched = due.len();
        for job in due {
            while inflight.len() >= concurrency.max(1) {
                inflight.join_next().await;
            }
            let orchestrator = Arc::clone(self);
            inflight.spawn(async move { orchestrator.retry_one(job).await });
        }
        while inflight.join_next().await.is_some() {}

        Ok(dispatched)
    }

    /// Resends one job already observed `due_for_retry`, under its
    /// per-key lock so it can't race a concurrent `deliver` or `replay`
    /// for the same `(tenant, partner, idempotency_key)`.
    async fn retry_one(&self, job: DeliveryJob) {
        let lock = self.lock_for(&job.tenant, &job.partner, &job.idempotency_key).await;
        let _guard = lock.lock().await;

        let repo = DeliveryJobRepository::new(&self.pool);
        // Re-read under the lock: a concurrent deliver/replay/previous
        // drain tick may already have moved this job past pending.
        let mut current = match repo.get(job.id).await {
            Ok(j) if j.status == JobStatus::Pending && j.next_eligible_at <= Utc::now() => j,
            Ok(_) => return,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "retry drain could not re-read job, skipping");
                return;
            }
        };

        let policy = self.policy_resolver.resolve(&current.tenant);
        let redacted = policy.redact(&current.payload);
        let partner = current.partner.clone();

        if let Err(e) = self.attempt_send(&repo, &mut current, &redacted, &partner).await {
            warn!(tenant = %current.tenant, partner, job_id = %current.id, error = %e, "scheduled retry attempt failed");
        }
    }

    /// Spawns a background task that calls `drain_due_retries` on
    /// `interval` until the orchestrator's cancellation token fires.
    pub fn spawn_retry_loop(self: &Arc<Self>, interval: Duration, concurrency: usize) -> tokio::task::JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        let cancellation = orchestrator.cancellation.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = orchestrator.drain_due_retries(concurrency).await {
                            warn!(error = %e, "retry drain tick failed");
                        }
                    }
                    _ = cancellation.cancelled() => {
                        info!("retry drain loop stopping on shutdown");
                        break;
                    }
                }
            }
        })
    }
}
