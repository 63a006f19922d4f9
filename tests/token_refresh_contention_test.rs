//! Seed scenario 6 (spec §8): a Workday token expires, ten concurrent
//! deliveries arrive for the same tenant, and exactly one OAuth
//! exchange is observed while all ten deliveries succeed — the token
//! store's single-flight lock collapses the refresh burst.

use std::sync::Arc;

use progressive_delivery::config::DatabaseConfig;
use progressive_delivery::delivery::partners::{WorkdayClient, WorkdayTokenRefresher};
use progressive_delivery::delivery::{DeliveryOrchestrator, StaticTenantPolicyResolver};
use progressive_delivery::idempotency::{IdempotencyCache, InMemoryIdempotencyStore};
use progressive_delivery::notify::NotificationDispatcher;
use progressive_delivery::observability::{MetricsConfig, MetricsRegistry};
use progressive_delivery::storage::DatabasePool;
use progressive_delivery::tokens::TokenStore;
use serial_test::serial;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn sqlite_pool() -> DatabasePool {
    let config = DatabaseConfig { url: "sqlite::memory:".to_string(), pool_size: 10, run_migrations: true };
    DatabasePool::connect(&config).await.unwrap()
}

fn metrics() -> Arc<MetricsRegistry> {
    Arc::new(
        MetricsRegistry::new(MetricsConfig {
            enabled: true,
            endpoint: "/metrics".into(),
            port: None,
            include_process_metrics: false,
            latency_buckets: vec![0.1, 1.0],
        })
        .unwrap(),
    )
}

#[tokio::test]
async fn ten_concurrent_deliveries_collapse_to_one_oauth_exchange() {
    std::env::set_var("WORKDAY_CLIENT_ID", "id");
    std::env::set_var("WORKDAY_CLIENT_SECRET", "secret");
    std::env::set_var("WORKDAY_REFRESH_TOKEN", "refresh-tok");

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "fresh-token",
            "token_type": "Bearer",
            "expires_in": 3600,
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/ccx/api/v1/benefitAdjustments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "referenceId": "ref",
            "accepted": true,
        })))
        .mount(&server)
        .await;

    let pool = sqlite_pool().await;
    let tokens = Arc::new(
        TokenStore::new(pool.clone())
            .with_refresher("workday", Arc::new(WorkdayTokenRefresher::new(format!("{}/oauth/token", server.uri())))),
    );
    let cache = Arc::new(IdempotencyCache::new(InMemoryIdempotencyStore::new()));
    let orchestrator = Arc::new(
        DeliveryOrchestrator::new(
            pool,
            tokens,
            cache,
            Arc::new(StaticTenantPolicyResolver::new()),
            NotificationDispatcher::new(vec![]),
            metrics(),
        )
        .with_client("workday", Arc::new(WorkdayClient::new(server.uri(), 1000.0, 1000.0))),
    );

    let mut handles = Vec::new();
    for i in 0..10 {
        let orchestrator = orchestrator.clone();
        handles.push(tokio::spawn(async move {
            orchestrator
                .deliver("t1", "workday", serde_json::json!({ "adjustment": i }), None)
                .await
        }));
    }

    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert!(outcome.job.status == progressive_delivery::domain::JobStatus::Delivered);
    }

    std::env::remove_var("WORKDAY_CLIENT_ID");
    std::env::remove_var("WORKDAY_CLIENT_SECRET");
    std::env::remove_var("WORKDAY_REFRESH_TOKEN");

    // `.expect(1)` on the token-endpoint mock (verified at drop) asserts
    // exactly one OAuth exchange was observed across all ten deliveries.
}
