//! Component B — Traffic Router.
//!
//! Owns the one knob the rest of the system turns: the live traffic
//! percentage routed to a canary per `(service, region)`. `InMemoryRouter` is the
//! default for single-binary deployments; `HttpTrafficRouter` delegates
//! to an external feature-flag service over the same `reqwest` client
//! the rest of the crate uses.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("feature-flag service returned status {0}")]
    UnexpectedStatus(u16),
}

#[async_trait]
pub trait TrafficRouter: Send + Sync {
    async fn set_percentage(
        &self,
        service: &str,
        region: &str,
        pct: f64,
    ) -> Result<(), RouterError>;

    async fn get_percentage(&self, service: &str, region: &str) -> Result<f64, RouterError>;
}

fn clamp_pct(pct: f64) -> f64 {
    pct.clamp(0.0, 1.0)
}

struct CachedWeight {
    value: f64,
    fetched_at: Instant,
}

const READ_CACHE_TTL: Duration = Duration::from_secs(60);

/// Process-local router backing the `feature_flags.provider: in-memory`
/// case. Reads are served from a short-lived cache so a hot monitor loop
/// doesn't re-derive the same weight on every tick.
#[derive(Clone)]
pub struct InMemoryRouter {
    weights: Arc<RwLock<HashMap<(String, String), CachedWeight>>>,
}

impl Default for InMemoryRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRouter {
    pub fn new() -> Self {
        Self {
            weights: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn key(service: &str, region: &str) -> (String, String) {
        (service.to_string(), region.to_string())
    }
}

#[async_trait]
impl TrafficRouter for InMemoryRouter {
    async fn set_percentage(
        &self,
        service: &str,
        region: &str,
        pct: f64,
    ) -> Result<(), RouterError> {
        let pct = clamp_pct(pct);
        self.weights.write().await.insert(
            Self::key(service, region),
            CachedWeight {
                value: pct,
                fetched_at: Instant::now(),
            },
        );
        Ok(())
    }

    async fn get_percentage(&self, service: &str, region: &str) -> Result<f64, RouterError> {
        let key = Self::key(service, region);
        if let Some(cached) = self.weights.read().await.get(&key) {
            if cached.fetched_at.elapsed() < READ_CACHE_TTL {
                return Ok(cached.value);
            }
        }
        // Cache miss or stale: in the in-memory case there's no upstream
        // to refresh from, so the last known weight (defaulting to 0)
        // stands.
        Ok(self
            .weights
            .read()
            .await
            .get(&key)
            .map(|c| c.value)
            .unwrap_or(0.0))
    }
}

/// Delegates weight changes to an external feature-flag API.
pub struct HttpTrafficRouter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpTrafficRouter {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let base_url = base_url.into();
        if let Err(e) = url::Url::parse(&base_url) {
            warn!(base_url, error = %e, "feature-flag base url does not parse as a url");
        }
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("reqwest client builder config is valid"),
            base_url,
            api_key: api_key.into(),
        }
    }

    pub fn from_env(base_url: impl Into<String>) -> Result<Self, RouterError> {
        let api_key = std::env::var("FEATURE_FLAG_API_KEY").unwrap_or_default();
        Ok(Self::new(base_url, api_key))
    }
}

#[async_trait]
impl TrafficRouter for HttpTrafficRouter {
    async fn set_percentage(
        &self,
        service: &str,
        region: &str,
        pct: f64,
    ) -> Result<(), RouterError> {
        let pct = clamp_pct(pct);
        let url = format!("{}/flags/{service}/{region}", self.base_url);
        let response = self
            .client
            .put(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "weight": pct }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RouterError::UnexpectedStatus(response.status().as_u16()));
        }
        Ok(())
    }

    async fn get_percentage(&self, service: &str, region: &str) -> Result<f64, RouterError> {
        let url = format!("{}/flags/{service}/{region}", self.base_url);
        let response = self.client.get(&url).bearer_auth(&self.api_key).send().await?;

        if !response.status().is_success() {
            return Err(RouterError::UnexpectedStatus(response.status().as_u16()));
        }

        #[derive(serde::Deserialize)]
        struct FlagResponse {
            weight: f64,
        }
        let body: FlagResponse = response.json().await?;
        Ok(clamp_pct(body.weight))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let router = InMemoryRouter::new();
        router.set_percentage("api", "us-east-1", 0.25).await.unwrap();
        assert_eq!(router.get_percentage("api", "us-east-1").await.unwrap(), 0.25);
    }

    #[tokio::test]
    async fn set_clamps_out_of_range() {
        let router = InMemoryRouter::new();
        router.set_percentage("api", "us-east-1", 1.5).await.unwrap();
        assert_eq!(router.get_percentage("api", "us-east-1").await.unwrap(), 1.0);

        router.set_percentage("api", "us-east-1", -0.5).await.unwrap();
        assert_eq!(router.get_percentage("api", "us-east-1").await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn unknown_region_defaults_to_zero() {
        let router = InMemoryRouter::new();
        assert_eq!(router.get_percentage("api", "eu-west-1").await.unwrap(), 0.0);
    }

    #[test]
    fn set_then_get_roundtrips_outside_the_tokio_test_macro() {
        let router = InMemoryRouter::new();
        tokio_test::block_on(router.set_percentage("api", "us-west-2", 0.1)).unwrap();
        let pct = tokio_test::block_on(router.get_percentage("api", "us-west-2")).unwrap();
        assert_eq!(pct, 0.1);
    }
}
