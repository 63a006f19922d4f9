//! Persistence layer: connection pooling and repositories for the
//! sqlx-backed domain types (§9 — delivery jobs, provider tokens, and
//! cached idempotency responses are persisted; deployments and stages
//! stay in-memory, owned solely by the canary controller).

mod pool;
mod repository;

pub use pool::{DatabasePool, DatabaseType, PoolStats};
pub use repository::{CachedResponseRepository, DeliveryJobRepository, ProviderTokenRepository};
