//! Benevity partner client: giving/matching records posted as JSON,
//! bearer-token auth, `X-Benevity-Signature` webhook verification.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

use crate::domain::ProviderToken;
use crate::tokens::{TokenError, TokenRefresher};

use super::ratelimit::TokenBucket;
use super::{PartnerClient, PartnerError, PartnerRequest, PartnerResponse};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct BenevityClient {
    client: reqwest::Client,
    base_url: String,
    rate_limiter: TokenBucket,
}

impl BenevityClient {
    pub fn new(base_url: impl Into<String>, rps: f64, burst: f64) -> Self {
        let base_url = base_url.into();
        if let Err(e) = url::Url::parse(&base_url) {
            warn!(base_url, error = %e, "benevity base url does not parse as a url");
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
struct BenevityResponseBody {
    id: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[async_trait]
impl PartnerClient for BenevityClient {
    fn name(&self) -> &'static str {
        "benevity"
    }

    async fn send(&self, access_token: &str, request: &PartnerRequest) -> Result<PartnerResponse, PartnerError> {
        self.rate_limiter.acquire().await;

        let url = format!("{}/v1/donations", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(access_token)
            .header("Idempotency-Key", &request.idempotency_key)
            .header("X-API-Version", "1.0")
            .json(&request.payload)
            .send()
            .await
            .map_err(PartnerError::Transport)?;

        let status = response.status();
        let body: serde_json::Value = response.json().await.unwrap_or(serde_json::Value::Null);

        if !status.is_success() {
            return Err(PartnerError::from_status("benevity", status.as_u16(), body.to_string()));
        }

        let parsed: BenevityResponseBody = serde_json::from_value(body.clone()).unwrap_or(BenevityResponseBody {
            id: None,
            status: None,
        });

        Ok(PartnerResponse {
            accepted: parsed.status.as_deref() != Some("rejected"),
            external_id: parsed.id,
            retryable: false,
            status_code: status.as_u16(),
            body,
        })
    }
}

/// OAuth2 client-credentials refresh against Benevity's token endpoint.
/// Credentials come from the process environment per §6 — there is no
/// per-tenant secret store in scope for this crate.
pub struct BenevityTokenRefresher {
    client: reqwest::Client,
    token_url: String,
}

impl BenevityTokenRefresher {
    pub fn new(token_url: impl Into<String>) -> Self {
        let token_url = token_url.into();
        if let Err(e) = url::Url::parse(&token_url) {
            warn!(token_url, error = %e, "benevity token url does not parse as a url");
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
        let token_url = std::env::var("BENEVITY_TOKEN_URL")
            .unwrap_or_else(|_| "https://auth.benevity.com/oauth/token".to_string());
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
impl TokenRefresher for BenevityTokenRefresher {
    async fn refresh(&self, tenant: &str) -> Result<ProviderToken, TokenError> {
        let client_id = std::env::var("BENEVITY_CLIENT_ID").unwrap_or_default();
        let client_secret = std::env::var("BENEVITY_CLIENT_SECRET").unwrap_or_default();

        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", &client_id),
                ("client_secret", &client_secret),
            ])
            .send()
            .await
            .map_err(|source| TokenError::RefreshFailed {
                tenant: tenant.to_string(),
                partner: "benevity".to_string(),
                source,
            })?;

        let body: TokenResponse = response.json().await.map_err(|source| TokenError::RefreshFailed {
            tenant: tenant.to_string(),
            partner: "benevity".to_string(),
            source,
        })?;

        Ok(ProviderToken {
            tenant: tenant.to_string(),
            partner: "benevity".to_string(),
            access_token: body.access_token,
            token_type: body.token_type,
            expires_at: chrono::Utc::now() + chrono::Duration::seconds(body.expires_in),
        })
    }
}
