//! Component D — Provider Token Store.
//!
//! `get_valid` returns a live access token for `(tenant, partner)`,
//! refreshing it first if it's within the skew window of expiry.
//! Concurrent callers for the same key collapse onto a single refresh
//! via a keyed single-flight lock with double-checked reads against the
//! persisted store, so a burst of deliveries for one tenant doesn't
//! each independently hit the partner's token endpoint.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::ProviderToken;
use crate::storage::{DatabasePool, ProviderTokenRepository};

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("refresh failed for {tenant}/{partner}: {source}")]
    RefreshFailed {
        tenant: String,
        partner: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("no refresh credentials configured for partner '{0}'")]
    NoCredentials(String),
}

/// What the store calls to mint a fresh token when the cached one is
/// stale. One implementation per partner kind.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, tenant: &str) -> Result<ProviderToken, TokenError>;
}

pub struct TokenStore {
    pool: DatabasePool,
    refreshers: HashMap<String, Arc<dyn TokenRefresher>>,
    locks: Mutex<HashMap<(String, String), Arc<Mutex<()>>>>,
}

impl TokenStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self {
            pool,
            refreshers: HashMap::new(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_refresher(mut self, partner: impl Into<String>, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refreshers.insert(partner.into(), refresher);
        self
    }

    async fn lock_for(&self, tenant: &str, partner: &str) -> Arc<Mutex<()>> {
        let key = (tenant.to_string(), partner.to_string());
        let mut locks = self.locks.lock().await;
        locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Returns a live token, refreshing through the single-flight lock
    /// when the cached one is stale or missing.
    pub async fn get_valid(&self, tenant: &str, partner: &str) -> Result<ProviderToken, TokenError> {
        let repo = ProviderTokenRepository::new(&self.pool);

        if let Some(token) = repo.get(tenant, partner).await? {
            if !token.needs_refresh(Utc::now()) {
                return Ok(token);
            }
        }

        let lock = self.lock_for(tenant, partner).await;
        let _guard = lock.lock().await;

        // Double-checked: another caller may have refreshed while we
        // waited for the lock.
        if let Some(token) = repo.get(tenant, partner).await? {
            if !token.needs_refresh(Utc::now()) {
                return Ok(token);
            }
        }

        debug!(tenant, partner, "refreshing provider token");
        let refresher = self
            .refreshers
            .get(partner)
            .ok_or_else(|| TokenError::NoCredentials(partner.to_string()))?;
        let fresh = refresher.refresh(tenant).await?;
        repo.upsert(&fresh).await?;
        Ok(fresh)
    }

    /// Forces the next `get_valid` for `(tenant, partner)` to refresh,
    /// used by the delivery orchestrator's one-forced-refresh-then-retry
    /// response to an `AuthError` (§4.E).
    pub async fn invalidate(&self, tenant: &str, partner: &str) -> Result<(), TokenError> {
        let repo = ProviderTokenRepository::new(&self.pool);
        repo.delete(tenant, partner).await
    }
}
