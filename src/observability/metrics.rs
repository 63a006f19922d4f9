// Comprehensive metrics system with Prometheus

use prometheus::{
    Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, IntCounterVec, IntGauge,
    Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::config::MetricsConfig;

/// Error type for metrics operations
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to register metric: {0}")]
    RegistrationError(String),

    #[error("Failed to record metric: {0}")]
    RecordError(String),

    #[error("Failed to export metrics: {0}")]
    ExportError(String),

    #[error("Metric not found: {0}")]
    NotFound(String),
}

/// Global metrics registry for the canary controller and delivery engine.
pub struct MetricsRegistry {
    registry: Arc<Registry>,
    config: MetricsConfig,

    // Canary controller metrics
    pub deployments_started_total: IntCounterVec,
    pub deployments_completed_total: IntCounterVec,
    pub deployments_rolled_back_total: IntCounterVec,
    pub stage_transitions_total: IntCounterVec,
    pub monitor_tick_duration_seconds: HistogramVec,
    pub monitor_tick_errors_total: IntCounterVec,
    pub current_weight: GaugeVec,
    pub error_budget_remaining_pct: GaugeVec,
    pub error_budget_burn_rate: GaugeVec,

    // Delivery orchestrator / partner client metrics
    pub delivery_attempts_total: IntCounterVec,
    pub delivery_delivered_total: IntCounterVec,
    pub delivery_failed_total: IntCounterVec,
    pub delivery_dead_total: IntCounterVec,
    pub delivery_replays_total: IntCounterVec,
    pub partner_request_duration_seconds: HistogramVec,
    pub partner_rate_limit_wait_seconds: HistogramVec,

    // Idempotency cache metrics
    pub cache_hits_total: IntCounterVec,
    pub cache_misses_total: IntCounterVec,
    pub cache_stores_total: IntCounterVec,

    // Provider token store metrics
    pub token_refresh_total: IntCounterVec,
    pub token_refresh_duration_seconds: HistogramVec,

    // Notification fan-out metrics
    pub notifications_dispatched_total: IntCounterVec,
    pub notifications_failed_total: IntCounterVec,

    // Database metrics
    pub db_queries_total: IntCounterVec,
    pub db_query_duration_seconds: HistogramVec,
    pub db_connections_active: IntGauge,
    pub db_connections_idle: IntGauge,

    // System metrics
    pub uptime_seconds: Gauge,
    pub build_info: IntCounterVec,
}

impl MetricsRegistry {
    /// Create a new metrics registry
    pub fn new(config: MetricsConfig) -> Result<Self, MetricsError> {
        let registry = Registry::new();

        macro_rules! register {
            ($metric:expr) => {{
                registry
                    .register(Box::new($metric.clone()))
                    .map_err(|e| MetricsError::RegistrationError(e.to_string()))?;
            }};
        }

        let deployments_started_total = IntCounterVec::new(
            Opts::new("deployments_started_total", "Total canary deployments started")
                .namespace("progressive_delivery"),
            &["service", "region"],
        )
        .map_err(|e| MetricsError::RegistrationError(e.to_string()))?;
        register!(deployments_started_total);

        let deployments_completed_total = IntCounterVec::new(
            Opts::new("deployments_completed_total", "Total canary deployments completed")
                .namespace("progressive_delivery"),
            &["service", "region"],
        )
        .map_err(|e| MetricsError::RegistrationError(e.to_string()))?;
        register!(deployments_completed_total);

        let deployments_rolled_back_total = IntCounterVec::new(
            Opts::new("deployments_rolled_back_total", "Total canary deployments rolled back")
                .namespace("progressive_delivery"),
            &["service", "region", "reason"],
        )
        .map_err(|e| MetricsError::RegistrationError(e.to_string()))?;
        register!(deployments_rolled_back_total);

        let stage_transitions_total = IntCounterVec::new(
            Opts::new("stage_transitions_total", "Total stage advance transitions")
                .namespace("progressive_delivery"),
            &["service", "region"],
        )
        .map_err(|e| MetricsError::RegistrationError(e.to_string()))?;
        register!(stage_transitions_total);

        let monitor_tick_duration_seconds = HistogramVec::new(
            HistogramOpts::new("monitor_tick_duration_seconds", "Monitor tick duration")
                .namespace("progressive_delivery")
                .buckets(config.latency_buckets.clone()),
            &["service"],
        )
        .map_err(|e| MetricsError::RegistrationError(e.to_string()))?;
        register!(monitor_tick_duration_seconds);

        let monitor_tick_errors_total = IntCounterVec::new(
            Opts::new("monitor_tick_errors_total", "Transient errors swallowed by a monitor tick")
                .namespace("progressive_delivery"),
            &["service", "kind"],
        )
        .map_err(|e| MetricsError::RegistrationError(e.to_string()))?;
        register!(monitor_tick_errors_total);

        let current_weight = GaugeVec::new(
            Opts::new("current_weight", "Current traffic weight for a deployment")
                .namespace("progressive_delivery"),
            &["service", "region"],
        )
        .map_err(|e| MetricsError::RegistrationError(e.to_string()))?;
        register!(current_weight);

        let error_budget_remaining_pct = GaugeVec::new(
            Opts::new("error_budget_remaining_pct", "Remaining error budget percentage")
                .namespace("progressive_delivery"),
            &["service", "region"],
        )
        .map_err(|e| MetricsError::RegistrationError(e.to_string()))?;
        register!(error_budget_remaining_pct);

        let error_budget_burn_rate = GaugeVec::new(
            Opts::new("error_budget_burn_rate", "Error budget burn rate")
                .namespace("progressive_delivery"),
            &["service", "region"],
        )
        .map_err(|e| MetricsError::RegistrationError(e.to_string()))?;
        register!(error_budget_burn_rate);

        let delivery_attempts_total = IntCounterVec::new(
            Opts::new("delivery_attempts_total", "Total delivery attempts")
                .namespace("progressive_delivery"),
            &["partner", "tenant"],
        )
        .map_err(|e| MetricsError::RegistrationError(e.to_string()))?;
        register!(delivery_attempts_total);

        let delivery_delivered_total = IntCounterVec::new(
            Opts::new("delivery_delivered_total", "Total deliveries that reached delivered status")
                .namespace("progressive_delivery"),
            &["partner", "tenant", "from_cache"],
        )
        .map_err(|e| MetricsError::RegistrationError(e.to_string()))?;
        register!(delivery_delivered_total);

        let delivery_failed_total = IntCounterVec::new(
            Opts::new("delivery_failed_total", "Total deliveries that failed permanently")
                .namespace("progressive_delivery"),
            &["partner", "tenant"],
        )
        .map_err(|e| MetricsError::RegistrationError(e.to_string()))?;
        register!(delivery_failed_total);

        let delivery_dead_total = IntCounterVec::new(
            Opts::new("delivery_dead_total", "Total deliveries that exhausted retry attempts")
                .namespace("progressive_delivery"),
            &["partner", "tenant"],
        )
        .map_err(|e| MetricsError::RegistrationError(e.to_string()))?;
        register!(delivery_dead_total);

        let delivery_replays_total = IntCounterVec::new(
            Opts::new("delivery_replays_total", "Total operator-initiated replays")
                .namespace("progressive_delivery"),
            &["partner", "forced"],
        )
        .map_err(|e| MetricsError::RegistrationError(e.to_string()))?;
        register!(delivery_replays_total);

        let partner_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new("partner_request_duration_seconds", "Partner API request duration")
                .namespace("progressive_delivery")
                .buckets(config.latency_buckets.clone()),
            &["partner"],
        )
        .map_err(|e| MetricsError::RegistrationError(e.to_string()))?;
        register!(partner_request_duration_seconds);

        let partner_rate_limit_wait_seconds = HistogramVec::new(
            HistogramOpts::new("partner_rate_limit_wait_seconds", "Time spent waiting on the partner token bucket")
                .namespace("progressive_delivery")
                .buckets(config.latency_buckets.clone()),
            &["partner"],
        )
        .map_err(|e| MetricsError::RegistrationError(e.to_string()))?;
        register!(partner_rate_limit_wait_seconds);

        let cache_hits_total = IntCounterVec::new(
            Opts::new("cache_hits_total", "Total idempotency cache hits").namespace("progressive_delivery"),
            &["namespace"],
        )
        .map_err(|e| MetricsError::RegistrationError(e.to_string()))?;
        register!(cache_hits_total);

        let cache_misses_total = IntCounterVec::new(
            Opts::new("cache_misses_total", "Total idempotency cache misses").namespace("progressive_delivery"),
            &["namespace"],
        )
        .map_err(|e| MetricsError::RegistrationError(e.to_string()))?;
        register!(cache_misses_total);

        let cache_stores_total = IntCounterVec::new(
            Opts::new("cache_stores_total", "Total idempotency cache stores").namespace("progressive_delivery"),
            &["namespace"],
        )
        .map_err(|e| MetricsError::RegistrationError(e.to_string()))?;
        register!(cache_stores_total);

        let token_refresh_total = IntCounterVec::new(
            Opts::new("token_refresh_total", "Total provider token refresh exchanges")
                .namespace("progressive_delivery"),
            &["partner"],
        )
        .map_err(|e| MetricsError::RegistrationError(e.to_string()))?;
        register!(token_refresh_total);

        let token_refresh_duration_seconds = HistogramVec::new(
            HistogramOpts::new("token_refresh_duration_seconds", "Provider token refresh duration")
                .namespace("progressive_delivery")
                .buckets(config.latency_buckets.clone()),
            &["partner"],
        )
        .map_err(|e| MetricsError::RegistrationError(e.to_string()))?;
        register!(token_refresh_duration_seconds);

        let notifications_dispatched_total = IntCounterVec::new(
            Opts::new("notifications_dispatched_total", "Total notifications dispatched to a channel")
                .namespace("progressive_delivery"),
            &["channel", "kind"],
        )
        .map_err(|e| MetricsError::RegistrationError(e.to_string()))?;
        register!(notifications_dispatched_total);

        let notifications_failed_total = IntCounterVec::new(
            Opts::new("notifications_failed_total", "Total per-channel notification failures")
                .namespace("progressive_delivery"),
            &["channel"],
        )
        .map_err(|e| MetricsError::RegistrationError(e.to_string()))?;
        register!(notifications_failed_total);

        let db_queries_total = IntCounterVec::new(
            Opts::new("db_queries_total", "Total database queries").namespace("progressive_delivery"),
            &["operation", "table"],
        )
        .map_err(|e| MetricsError::RegistrationError(e.to_string()))?;
        register!(db_queries_total);

        let db_query_duration_seconds = HistogramVec::new(
            HistogramOpts::new("db_query_duration_seconds", "Database query duration")
                .namespace("progressive_delivery")
                .buckets(config.latency_buckets.clone()),
            &["operation"],
        )
        .map_err(|e| MetricsError::RegistrationError(e.to_string()))?;
        register!(db_query_duration_seconds);

        let db_connections_active = IntGauge::new(
            "progressive_delivery_db_connections_active",
            "Active database connections",
        )
        .map_err(|e| MetricsError::RegistrationError(e.to_string()))?;
        register!(db_connections_active);

        let db_connections_idle = IntGauge::new(
            "progressive_delivery_db_connections_idle",
            "Idle database connections",
        )
        .map_err(|e| MetricsError::RegistrationError(e.to_string()))?;
        register!(db_connections_idle);

        let uptime_seconds = Gauge::new(
            "progressive_delivery_uptime_seconds",
            "Control plane uptime in seconds",
        )
        .map_err(|e| MetricsError::RegistrationError(e.to_string()))?;
        register!(uptime_seconds);

        let build_info = IntCounterVec::new(
            Opts::new("build_info", "Build information").namespace("progressive_delivery"),
            &["version"],
        )
        .map_err(|e| MetricsError::RegistrationError(e.to_string()))?;
        register!(build_info);

        build_info.with_label_values(&[env!("CARGO_PKG_VERSION")]).inc();

        if config.include_process_metrics {
            let process_collector = prometheus::process_collector::ProcessCollector::for_self();
            registry
                .register(Box::new(process_collector))
                .map_err(|e| MetricsError::RegistrationError(e.to_string()))?;
        }

        Ok(Self {
            registry: Arc::new(registry),
            config,
            deployments_started_total,
            deployments_completed_total,
            deployments_rolled_back_total,
            stage_transitions_total,
            monitor_tick_duration_seconds,
            monitor_tick_errors_total,
            current_weight,
            error_budget_remaining_pct,
            error_budget_burn_rate,
            delivery_attempts_total,
            delivery_delivered_total,
            delivery_failed_total,
            delivery_dead_total,
            delivery_replays_total,
            partner_request_duration_seconds,
            partner_rate_limit_wait_seconds,
            cache_hits_total,
            cache_misses_total,
            cache_stores_total,
            token_refresh_total,
            token_refresh_duration_seconds,
            notifications_dispatched_total,
            notifications_failed_total,
            db_queries_total,
            db_query_duration_seconds,
            db_connections_active,
            db_connections_idle,
            uptime_seconds,
            build_info,
        })
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| MetricsError::ExportError(e.to_string()))?;

        String::from_utf8(buffer).map_err(|e| MetricsError::ExportError(e.to_string()))
    }

    /// Get the underlying registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    histogram: Histogram,
}

impl Timer {
    /// Create a new timer
    pub fn new(histogram: Histogram) -> Self {
        Self {
            start: Instant::now(),
            histogram,
        }
    }

    /// Observe the elapsed time and record it
    pub fn observe_duration(self) -> Duration {
        let duration = self.start.elapsed();
        self.histogram.observe(duration.as_secs_f64());
        duration
    }
}

/// Helper to create a timer from a histogram
pub fn start_timer(histogram: &Histogram) -> Timer {
    Timer::new(histogram.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registry_creation() {
        let registry = MetricsRegistry::new(MetricsConfig::default()).unwrap();
        let exported = registry.export().unwrap();
        assert!(exported.contains("progressive_delivery"));
    }

    #[test]
    fn test_deployment_counters_increment() {
        let registry = MetricsRegistry::new(MetricsConfig::default()).unwrap();
        registry
            .deployments_started_total
            .with_label_values(&["api", "us-east-1"])
            .inc();
        let exported = registry.export().unwrap();
        assert!(exported.contains("deployments_started_total"));
    }

    #[test]
    fn test_timer_records_duration() {
        let registry = MetricsRegistry::new(MetricsConfig::default()).unwrap();
        let histogram = registry
            .monitor_tick_duration_seconds
            .with_label_values(&["api"]);
        let timer = start_timer(&histogram);
        std::thread::sleep(Duration::from_millis(5));
        let elapsed = timer.observe_duration();
        assert!(elapsed.as_millis() >= 5);
    }
}
