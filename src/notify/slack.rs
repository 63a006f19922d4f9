//! Slack channel: HTTPS POST to an incoming webhook, one attachment
//! per event with a severity colour and `{Service, Version, Region,
//! Status}` fields. Severity colour/emoji is presentational only, per
//! §4.H — it carries no semantics beyond what a human reads.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use crate::config::ChannelFilter;
use crate::domain::{NotificationEvent, NotificationSubject, Severity};

use super::{NotificationChannel, NotifyError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SlackChannel {
    webhook_url: String,
    client: reqwest::Client,
    channels: Vec<ChannelFilter>,
}

impl SlackChannel {
    pub fn new(webhook_url: impl Into<String>, channels: Vec<ChannelFilter>) -> Self {
        let webhook_url = webhook_url.into();
        if let Err(e) = url::Url::parse(&webhook_url) {
            tracing::warn!(error = %e, "slack webhook url does not parse as a url");
        }
        Self {
            webhook_url,
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("reqwest client builder config is valid"),
            channels,
        }
    }

    fn colour(severity: Severity) -> &'static str {
        match severity {
            Severity::Info => "#36a64f",
            Severity::Warning => "#daa520",
            Severity::Critical => "#d63031",
        }
    }

    fn fields(subject: &NotificationSubject) -> Vec<serde_json::Value> {
        match subject {
            NotificationSubject::Deployment { service, version, region, .. } => vec![
                json!({ "title": "Service", "value": service, "short": true }),
                json!({ "title": "Version", "value": version, "short": true }),
                json!({ "title": "Region", "value": region, "short": true }),
            ],
            NotificationSubject::Delivery { tenant, partner, .. } => vec![
                json!({ "title": "Tenant", "value": tenant, "short": true }),
                json!({ "title": "Partner", "value": partner, "short": true }),
            ],
        }
    }
}

#[async_trait]
impl NotificationChannel for SlackChannel {
    fn name(&self) -> &str {
        "slack"
    }

    fn matches(&self, event_kind: &str) -> bool {
        self.channels.iter().any(|c| c.matches(event_kind))
    }

    async fn send(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        let payload = json!({
            "attachments": [{
                "color": Self::colour(event.severity),
                "title": event.kind,
                "text": event.message,
                "fields": Self::fields(&event.subject),
                "ts": event.timestamp.timestamp(),
            }]
        });

        self.client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}
