//! ProviderToken — the value owned by the provider token store.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Unique on `(tenant, partner)`; refreshed when `now + skew >= expiresAt`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProviderToken {
    pub tenant: String,
    pub partner: String,
    pub access_token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
}

/// Refresh skew: tokens are considered stale 30s before their actual expiry.
pub fn refresh_skew() -> Duration {
    Duration::seconds(30)
}

impl ProviderToken {
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        now + refresh_skew() >= self.expires_at
    }
}
