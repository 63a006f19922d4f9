//! Workday partner client: benefits/payroll adjustment records posted
//! as JSON, bearer-token auth, `X-Workday-Signature` webhook
//! verification.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

use crate::domain::ProviderToken;
use crate::tokens::{TokenError, TokenRefresher};

use super::ratelimit::TokenBucket;
use super::{PartnerClient, PartnerError, PartnerRequest, PartnerResponse};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct WorkdayClient {
    client: reqwest::Client,
    base_url: String,
    rate_limiter: TokenBucket,
}

impl WorkdayClient {
    pub fn new(base_url: impl Into<String>, rps: f64, burst: f64) -> Self {
        let base_url = base_url.into();
        if let Err(e) = url::Url::parse(&base_url) {
            warn!(base_url, error = %e, "workday base url does not parse as a url");
        }
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("reqwest client builder config is valid"),
            base_url,
            rate_limiter: TokenBucket::new(burst, rps),
        }
    }
}

#[derive(Deserialize)]
struct WorkdayResponseBody {
    #[serde(rename = "referenceId")]
    reference_id: Option<String>,
    #[serde(default)]
    accepted: Option<bool>,
}

#[async_trait]
impl PartnerClient for WorkdayClient {
    fn name(&self) -> &'static str {
        "workday"
    }

    async fn send(&self, access_token: &str, request: &PartnerRequest) -> Result<PartnerResponse, PartnerError> {
        self.rate_limiter.acquire().await;

        let url = format!("{}/ccx/api/v1/benefitAdjustments", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(access_token)
            .header("Idempotency-Key", &request.idempotency_key)
            .json(&request.payload)
            .send()
            .await
            .map_err(PartnerError::Transport)?;

        let status = response.status();
        let body: serde_json::Value = response.json().await.unwrap_or(serde_json::Value::Null);

        if !status.is_success() {
            return Err(PartnerError::from_status("workday", status.as_u16(), body.to_string()));
        }

        let parsed: WorkdayResponseBody = serde_json::from_value(body.clone()).unwrap_or(WorkdayResponseBody {
            reference_id: None,
            accepted: None,
        });

        Ok(PartnerResponse {
            accepted: parsed.accepted.unwrap_or(true),
            external_id: parsed.reference_id,
            retryable: false,
            status_code: status.as_u16(),
            body,
        })
    }
}

/// OAuth2 client-credentials refresh against Workday's tenant-scoped
/// token endpoint. Credentials come from the process environment per
/// §6 — there is no per-tenant secret store in scope for this crate.
pub struct WorkdayTokenRefresher {
    client: reqwest::Client,
    token_url: String,
}

impl WorkdayTokenRefresher {
    pub fn new(token_url: impl Into<String>) -> Self {
        let token_url = token_url.into();
        if let Err(e) = url::Url::parse(&token_url) {
            warn!(token_url, error = %e, "workday token url does not parse as a url");
        }
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("reqwest client builder config is valid"),
            token_url,
        }
    }

    pub fn from_env() -> Result<Self, TokenError> {
        let token_url =
            std::env::var("WORKDAY_TOKEN_URL").map_err(|_| TokenError::NoCredentials("workday".to_string()))?;
        Ok(Self::new(token_url))
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    expires_in: i64,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

#[async_trait]
impl TokenRefresher for WorkdayTokenRefresher {
    async fn refresh(&self, tenant: &str) -> Result<ProviderToken, TokenError> {
        let client_id = std::env::var("WORKDAY_CLIENT_ID").unwrap_or_default();
        let client_secret = std::env::var("WORKDAY_CLIENT_SECRET").unwrap_or_default();
        let refresh_token = std::env::var("WORKDAY_REFRESH_TOKEN").unwrap_or_default();

        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", &client_id),
                ("client_secret", &client_secret),
                ("refresh_token", &refresh_token),
            ])
            .send()
            .await
            .map_err(|source| TokenError::RefreshFailed {
                tenant: tenant.to_string(),
                partner: "workday".to_string(),
                source,
            })?;

        let body: TokenResponse = response.json().await.map_err(|source| TokenError::RefreshFailed {
            tenant: tenant.to_string(),
            partner: "workday".to_string(),
            source,
        })?;

        Ok(ProviderToken {
            tenant: tenant.to_string(),
            partner: "workday".to_string(),
            access_token: body.access_token,
            token_type: body.token_type,
            expires_at: chrono::Utc::now() + chrono::Duration::seconds(body.expires_in),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn send_posts_to_benefit_adjustments_and_defaults_accepted_true() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ccx/api/v1/benefitAdjustments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "referenceId": "ref_123",
            })))
            .mount(&server)
            .await;

        let client = WorkdayClient::new(server.uri(), 100.0, 100.0);
        let request = PartnerRequest {
            tenant: "acme".to_string(),
            idempotency_key: "key-1".to_string(),
            payload: serde_json::json!({ "adjustment": 5 }),
        };

        let response = client.send("token", &request).await.unwrap();
        assert!(response.accepted);
        assert_eq!(response.external_id, Some("ref_123".to_string()));
    }

    #[tokio::test]
    async fn send_maps_a_401_response_to_an_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ccx/api/v1/benefitAdjustments"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = WorkdayClient::new(server.uri(), 100.0, 100.0);
        let request = PartnerRequest {
            tenant: "acme".to_string(),
            idempotency_key: "key-2".to_string(),
            payload: serde_json::json!({}),
        };

        let err = client.send("token", &request).await.unwrap_err();
        assert!(err.is_auth());
    }

    #[tokio::test]
    #[serial]
    async fn refresh_exchanges_the_refresh_token_for_an_access_token() {
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
            .mount(&server)
            .await;

        let refresher = WorkdayTokenRefresher::new(format!("{}/oauth/token", server.uri()));
        let token = refresher.refresh("acme").await.unwrap();
        assert_eq!(token.access_token, "fresh-token");
        assert_eq!(token.partner, "workday");

        std::env::remove_var("WORKDAY_CLIENT_ID");
        std::env::remove_var("WORKDAY_CLIENT_SECRET");
        std::env::remove_var("WORKDAY_REFRESH_TOKEN");
    }
}
