//! Component E — Partner API Clients.
//!
//! Every partner speaks through the same `PartnerClient` trait so the
//! orchestrator never special-cases a partner kind. Errors are
//! classified into transient (retry), permanent (dead-letter
//! immediately), and auth (force one token refresh, then retry once)
//! so the retry policy can make that decision without inspecting HTTP
//! status codes itself.

mod benevity;
mod ratelimit;
mod retry;
mod signature;
mod workday;

pub use benevity::{BenevityClient, BenevityTokenRefresher};
pub use ratelimit::TokenBucket;
pub use retry::RetryPolicy;
pub use signature::verify_signature;
pub use workday::{WorkdayClient, WorkdayTokenRefresher};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PartnerError {
    #[error("transient error calling {partner}: {message}")]
    Transient { partner: String, message: String },

    #[error("permanent error calling {partner}: {message}")]
    Permanent { partner: String, message: String },

    #[error("authentication error calling {partner}: {message}")]
    Auth { partner: String, message: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Token(#[from] crate::tokens::TokenError),
}

impl PartnerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Transport(_))
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent { .. })
    }

    /// Classifies a partner HTTP status the way every partner client
    /// in this crate does: 401/403 is an auth failure, 429/5xx is
    /// transient, everything else in the 4xx range is permanent.
    pub fn from_status(partner: &str, status: u16, body: impl Into<String>) -> Self {
        let message = body.into();
        match status {
            401 | 403 => Self::Auth {
                partner: partner.to_string(),
                message,
            },
            429 => Self::Transient {
                partner: partner.to_string(),
                message,
            },
            500..=599 => Self::Transient {
                partner: partner.to_string(),
                message,
            },
            _ => Self::Permanent {
                partner: partner.to_string(),
                message,
            },
        }
    }
}

/// One request sent to a partner, keyed by the idempotency key the
/// orchestrator derived upstream.
#[derive(Debug, Clone)]
pub struct PartnerRequest {
    pub tenant: String,
    pub idempotency_key: String,
    pub payload: serde_json::Value,
}

/// `{accepted, externalId?, retryable, statusCode, body}`, normalized
/// the same way across every partner kind so the orchestrator never
/// has to special-case a response shape.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PartnerResponse {
    pub accepted: bool,
    pub external_id: Option<String>,
    pub retryable: bool,
    pub status_code: u16,
    pub body: serde_json::Value,
}

#[async_trait]
pub trait PartnerClient: Send + Sync {
    fn name(&self) -> &'static str;

    /// Enforces the partner's documented RPS via a token-bucket wait,
    /// then sends the request with the already-resolved access token.
    async fn send(
        &self,
        access_token: &str,
        request: &PartnerRequest,
    ) -> Result<PartnerResponse, PartnerError>;

    /// Timing-safe HMAC-SHA256 verification of an inbound webhook,
    /// over the raw body plus whatever extra headers the partner
    /// includes in its signature.
    fn verify(
        &self,
        signature_header: &str,
        body: &bytes::Bytes,
        extra_headers: &[(&str, &str)],
        secret: &str,
    ) -> bool {
        signature::verify_signature(signature_header, body, extra_headers, secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(PartnerError::from_status("benevity", 401, "").is_auth());
        assert!(PartnerError::from_status("benevity", 429, "").is_retryable());
        assert!(PartnerError::from_status("benevity", 503, "").is_retryable());
        assert!(PartnerError::from_status("benevity", 400, "").is_permanent());
        assert!(PartnerError::from_status("benevity", 404, "").is_permanent());
    }
}
