//! Seed scenario 5 (spec §8): a payload posted to Benevity for a tenant
//! returns `{accepted:true, externalId}`; a second `deliver` with the
//! same payload within the cache TTL returns `fromCache=true` and the
//! partner receives exactly one POST.

use std::sync::Arc;

use progressive_delivery::config::DatabaseConfig;
use progressive_delivery::delivery::partners::BenevityClient;
use progressive_delivery::delivery::{DeliveryOrchestrator, StaticTenantPolicyResolver};
use progressive_delivery::domain::JobStatus;
use progressive_delivery::idempotency::{IdempotencyCache, InMemoryIdempotencyStore};
use progressive_delivery::notify::NotificationDispatcher;
use progressive_delivery::observability::{MetricsConfig, MetricsRegistry};
use progressive_delivery::storage::DatabasePool;
use progressive_delivery::tokens::TokenStore;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn sqlite_pool() -> DatabasePool {
    let config = DatabaseConfig { url: "sqlite::memory:".to_string(), pool_size: 5, run_migrations: true };
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
async fn second_delivery_within_the_ttl_is_served_from_cache_and_skips_the_partner() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/donations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "B123",
            "status": "accepted",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let pool = sqlite_pool().await;
    let tokens = Arc::new(TokenStore::new(pool.clone()).with_refresher(
        "benevity",
        Arc::new(progressive_delivery::delivery::partners::BenevityTokenRefresher::new(format!(
            "{}/oauth/token",
            server.uri()
        ))),
    ));
    // The token store only hits the refresher when no live token is on
    // file, so seed one directly rather than also mocking the OAuth
    // endpoint — this scenario is about the delivery cache, not auth.
    progressive_delivery::storage::ProviderTokenRepository::new(&pool)
        .upsert(&progressive_delivery::domain::ProviderToken {
            tenant: "t1".to_string(),
            partner: "benevity".to_string(),
            access_token: "tok".to_string(),
            token_type: "Bearer".to_string(),
            expires_at: chrono::Utc::now() + chrono::Duration::hours(1),
        })
        .await
        .unwrap();

    let cache = Arc::new(IdempotencyCache::new(InMemoryIdempotencyStore::new()));
    let orchestrator = DeliveryOrchestrator::new(
        pool,
        tokens,
        cache,
        Arc::new(StaticTenantPolicyResolver::new()),
        NotificationDispatcher::new(vec![]),
        metrics(),
    )
    .with_client("benevity", Arc::new(BenevityClient::new(server.uri(), 100.0, 100.0)));

    let payload = serde_json::json!({ "amount": 25, "donor": "acme" });

    let first = orchestrator.deliver("t1", "benevity", payload.clone(), None).await.unwrap();
    assert!(!first.from_cache);
    assert_eq!(first.job.status, JobStatus::Delivered);

    let second = orchestrator.deliver("t1", "benevity", payload, None).await.unwrap();
    assert!(second.from_cache);
    assert_eq!(second.job.status, JobStatus::Delivered);

    // `.expect(1)` on the mock (verified at drop) asserts the partner
    // saw exactly one POST across both deliveries.
}
