//! Crate-wide error aggregate.
//!
//! Individual components (canary, delivery, tokens, idempotency, router)
//! define their own `thiserror` enums with `is_retryable`/`is_permanent`
//! classifiers; this type is the boundary error the CLI and top-level
//! wiring deal with.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ControlPlaneError>;

#[derive(Error, Debug)]
pub enum ControlPlaneError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Canary(#[from] crate::canary::CanaryError),

    #[error(transparent)]
    Delivery(#[from] crate::delivery::DeliveryError),

    #[error(transparent)]
    Partner(#[from] crate::delivery::partners::PartnerError),

    #[error(transparent)]
    Cache(#[from] crate::idempotency::CacheError),

    #[error(transparent)]
    Token(#[from] crate::tokens::TokenError),

    #[error(transparent)]
    Router(#[from] crate::router::RouterError),

    #[error(transparent)]
    Notify(#[from] crate::notify::NotifyError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("policy violation: {0}")]
    Policy(String),

    #[error("internal invariant breach: {0}")]
    Internal(String),
}

impl ControlPlaneError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    pub fn policy<S: Into<String>>(msg: S) -> Self {
        Self::Policy(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Exit code the CLI should use for this error, per the operator-surface contract.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound(_) | Self::Config(_) | Self::Policy(_) => 1,
            _ => 1,
        }
    }
}
