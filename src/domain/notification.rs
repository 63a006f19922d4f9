//! NotificationEvent — the ephemeral value fanned out to channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// `{eventKind, deployment|delivery, severity, message, timestamp}`.
/// Fanned out to channels that subscribe to `eventKind` (or wildcard).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub kind: String,
    pub subject: NotificationSubject,
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationSubject {
    Deployment {
        id: uuid::Uuid,
        service: String,
        version: String,
        region: String,
    },
    Delivery {
        id: uuid::Uuid,
        tenant: String,
        partner: String,
    },
}

impl NotificationEvent {
    pub fn new(
        kind: impl Into<String>,
        subject: NotificationSubject,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            subject,
            severity,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}
