//! Component C — Idempotency Cache.
//!
//! Derives a stable key from a canonicalized payload and caches the
//! first response seen for that key, so a retried delivery returns the
//! original result instead of re-executing a side effect against a
//! partner API. Cache failures never propagate as delivery failures —
//! on a store error this degrades to "treat as a cache miss" so the
//! orchestrator still makes forward progress.

mod key;

pub use key::derive_key;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

use crate::domain::CachedResponse;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn lookup(&self, namespace: &str, key: &str) -> Result<Option<CachedResponse>, CacheError>;
    async fn store(&self, entry: CachedResponse) -> Result<(), CacheError>;
    async fn invalidate(&self, namespace: &str, key: &str) -> Result<(), CacheError>;
}

const DEFAULT_TTL_HOURS: i64 = 24;

/// Fronts an `IdempotencyStore` with key derivation, TTL expiry, and
/// the cache-failure-is-a-miss policy.
pub struct IdempotencyCache<S: IdempotencyStore> {
    store: S,
    ttl: Duration,
    stats: Arc<Mutex<CacheStats>>,
}

impl<S: IdempotencyStore> IdempotencyCache<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            ttl: Duration::hours(DEFAULT_TTL_HOURS),
            stats: Arc::new(Mutex::new(CacheStats::default())),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Look up the cached response for a canonicalized payload. A store
    /// error or an expired entry is treated identically to a miss.
    pub async fn lookup(
        &self,
        namespace: &str,
        payload: &serde_json::Value,
    ) -> Option<CachedResponse> {
        let key = derive_key(namespace, payload);
        match self.store.lookup(namespace, &key).await {
            Ok(Some(entry)) if !entry.is_expired(Utc::now()) => {
                self.stats.lock().await.hits += 1;
                Some(entry)
            }
            Ok(Some(_)) => {
                self.stats.lock().await.misses += 1;
                None
            }
            Ok(None) => {
                self.stats.lock().await.misses += 1;
                None
            }
            Err(e) => {
                warn!(error = %e, namespace, "idempotency lookup failed, treating as miss");
                self.stats.lock().await.misses += 1;
                None
            }
        }
    }

    pub async fn store(
        &self,
        namespace: &str,
        payload: &serde_json::Value,
        body: serde_json::Value,
    ) -> Result<(), CacheError> {
        let key = derive_key(namespace, payload);
        let now = Utc::now();
        let entry = CachedResponse {
            key,
            namespace: namespace.to_string(),
            body,
            stored_at: now,
            expires_at: now + self.ttl,
        };
        self.store.store(entry).await?;
        self.stats.lock().await.stores += 1;
        Ok(())
    }

    pub async fn invalidate(&self, namespace: &str, payload: &serde_json::Value) -> Result<(), CacheError> {
        let key = derive_key(namespace, payload);
        self.store.invalidate(namespace, &key).await
    }

    pub async fn stats(&self) -> CacheStats {
        self.stats.lock().await.clone()
    }
}

/// In-memory store for tests and single-process deployments without a
/// database configured.
#[derive(Default, Clone)]
pub struct InMemoryIdempotencyStore {
    entries: Arc<Mutex<HashMap<(String, String), CachedResponse>>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn lookup(&self, namespace: &str, key: &str) -> Result<Option<CachedResponse>, CacheError> {
        Ok(self
            .entries
            .lock()
            .await
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    async fn store(&self, entry: CachedResponse) -> Result<(), CacheError> {
        self.entries
            .lock()
            .await
            .insert((entry.namespace.clone(), entry.key.clone()), entry);
        Ok(())
    }

    async fn invalidate(&self, namespace: &str, key: &str) -> Result<(), CacheError> {
        self.entries
            .lock()
            .await
            .remove(&(namespace.to_string(), key.to_string()));
        Ok(())
    }
}

/// `sqlx`-backed store for the persisted deployments described in §9.
pub struct SqlxIdempotencyStore {
    pool: crate::storage::DatabasePool,
}

impl SqlxIdempotencyStore {
    pub fn new(pool: crate::storage::DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyStore for SqlxIdempotencyStore {
    async fn lookup(&self, namespace: &str, key: &str) -> Result<Option<CachedResponse>, CacheError> {
        use crate::storage::DatabasePool;
        let row = match &self.pool {
            DatabasePool::Sqlite(p) => {
                sqlx::query_as::<_, CachedResponse>(
                    "SELECT key, namespace, body, stored_at, expires_at FROM cached_responses WHERE namespace = ? AND key = ?",
                )
                .bind(namespace)
                .bind(key)
                .fetch_optional(p.pool())
                .await?
            }
            #[cfg(feature = "postgres")]
            DatabasePool::Postgres(p) => {
                sqlx::query_as::<_, CachedResponse>(
                    "SELECT key, namespace, body, stored_at, expires_at FROM cached_responses WHERE namespace = $1 AND key = $2",
                )
                .bind(namespace)
                .bind(key)
                .fetch_optional(p.pool())
                .await?
            }
        };
        Ok(row)
    }

    async fn store(&self, entry: CachedResponse) -> Result<(), CacheError> {
        use crate::storage::DatabasePool;
        match &self.pool {
            DatabasePool::Sqlite(p) => {
                sqlx::query(
                    "INSERT INTO cached_responses (key, namespace, body, stored_at, expires_at) VALUES (?, ?, ?, ?, ?)
                     ON CONFLICT (namespace, key) DO UPDATE SET body = excluded.body, stored_at = excluded.stored_at, expires_at = excluded.expires_at",
                )
                .bind(&entry.key)
                .bind(&entry.namespace)
                .bind(&entry.body)
                .bind(entry.stored_at)
                .bind(entry.expires_at)
                .execute(p.pool())
                .await?;
            }
            #[cfg(feature = "postgres")]
            DatabasePool::Postgres(p) => {
                sqlx::query(
                    "INSERT INTO cached_responses (key, namespace, body, stored_at, expires_at) VALUES ($1, $2, $3, $4, $5)
                     ON CONFLICT (namespace, key) DO UPDATE SET body = excluded.body, stored_at = excluded.stored_at, expires_at = excluded.expires_at",
                )
                .bind(&entry.key)
                .bind(&entry.namespace)
                .bind(&entry.body)
                .bind(entry.stored_at)
                .bind(entry.expires_at)
                .execute(p.pool())
                .await?;
            }
        }
        Ok(())
    }

    async fn invalidate(&self, namespace: &str, key: &str) -> Result<(), CacheError> {
        use crate::storage::DatabasePool;
        match &self.pool {
            DatabasePool::Sqlite(p) => {
                sqlx::query("DELETE FROM cached_responses WHERE namespace = ? AND key = ?")
                    .bind(namespace)
                    .bind(key)
                    .execute(p.pool())
                    .await?;
            }
            #[cfg(feature = "postgres")]
            DatabasePool::Postgres(p) => {
                sqlx::query("DELETE FROM cached_responses WHERE namespace = $1 AND key = $2")
                    .bind(namespace)
                    .bind(key)
                    .execute(p.pool())
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_then_lookup_hits() {
        let cache = IdempotencyCache::new(InMemoryIdempotencyStore::new());
        let payload = serde_json::json!({ "tenant": "acme", "amount": 10 });

        assert!(cache.lookup("benevity", &payload).await.is_none());
        cache
            .store("benevity", &payload, serde_json::json!({ "status": "ok" }))
            .await
            .unwrap();

        let hit = cache.lookup("benevity", &payload).await.unwrap();
        assert_eq!(hit.body, serde_json::json!({ "status": "ok" }));

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.stores, 1);
    }

    #[tokio::test]
    async fn expired_entries_report_as_miss() {
        let cache = IdempotencyCache::new(InMemoryIdempotencyStore::new()).with_ttl(Duration::seconds(-1));
        let payload = serde_json::json!({ "a": 1 });
        cache.store("ns", &payload, serde_json::json!({})).await.unwrap();
        assert!(cache.lookup("ns", &payload).await.is_none());
    }

    #[tokio::test]
    async fn field_order_does_not_affect_key() {
        let a = serde_json::json!({ "b": 2, "a": 1 });
        let b = serde_json::json!({ "a": 1, "b": 2 });
        assert_eq!(derive_key("ns", &a), derive_key("ns", &b));
    }
}
