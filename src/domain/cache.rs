//! CachedResponse — the value owned by the idempotency cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Key = stable hash over a canonicalised payload. Invariant: two
/// payloads with identical semantic content produce identical keys.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CachedResponse {
    pub key: String,
    pub namespace: String,
    pub body: serde_json::Value,
    pub stored_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CachedResponse {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
