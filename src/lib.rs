//! Progressive-delivery control plane: a canary controller (component G)
//! and an external impact delivery engine (components A–F, H) sharing one
//! engineering core — scheduled control loops, authenticated external I/O,
//! durable state, and rollback/retry semantics under partial failure.
//!
//! Module-to-component mapping:
//! - [`metrics_source`] — A, the metric source adapter
//! - [`router`] — B, the feature-flag / traffic router
//! - [`idempotency`] — C, the idempotency cache
//! - [`tokens`] — D, the provider token store
//! - [`delivery::partners`] — E, the per-partner delivery clients
//! - [`delivery`] — F, the delivery orchestrator
//! - [`canary`] — G, the canary controller
//! - [`notify`] — H, the notification fan-out
//! - [`cli`] — the operator surface

pub mod canary;
pub mod cli;
pub mod config;
pub mod delivery;
pub mod domain;
pub mod idempotency;
pub mod metrics_source;
pub mod notify;
pub mod observability;
pub mod router;
pub mod storage;
pub mod tokens;

pub use domain::{ControlPlaneError, Result};

/// Library version, surfaced by `cli metrics`/`--json` output and the
/// health endpoint's build-info field.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
