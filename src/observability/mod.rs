//! Observability stack: configuration, structured logging/tracing,
//! Prometheus metrics, and health checks. Grouped the way the rest of
//! the crate groups ambient concerns — one module, re-exporting the
//! pieces `main.rs` wires together at startup.

pub mod config;
pub mod health;
pub mod metrics;
pub mod tracing;

pub use config::{HealthConfig, LoggingConfig, MetricsConfig, ObservabilityConfig, TracingConfig};
pub use health::{ComponentHealth, HealthCheck, HealthChecker, HealthStatus, SystemHealth};
pub use metrics::{MetricsError, MetricsRegistry};
pub use tracing::{init_tracing, CorrelationId, RequestId, TraceContext};

/// Brings up tracing/logging and the metrics registry from a single
/// config block. Health checks are registered by the caller once the
/// components they watch (database pool, cache, partner endpoints)
/// exist.
pub fn init(config: &ObservabilityConfig) -> Result<MetricsRegistry, String> {
    init_tracing(&config.tracing)?;
    MetricsRegistry::new(config.metrics.clone()).map_err(|e| e.to_string())
}
