//! PagerDuty channel: POST to the Events API v2 `/v2/enqueue` endpoint
//! with `event_action=trigger`.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use crate::domain::{NotificationEvent, NotificationSubject, Severity};

use super::{NotificationChannel, NotifyError};

const ENQUEUE_URL: &str = "https://events.pagerduty.com/v2/enqueue";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub struct PagerDutyChannel {
    integration_key: String,
    client: reqwest::Client,
    events: Vec<String>,
}

impl PagerDutyChannel {
    pub fn new(integration_key: impl Into<String>, events: Vec<String>) -> Self {
        Self {
            integration_key: integration_key.into(),
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("reqwest client builder config is valid"),
            events,
        }
    }

    fn severity(severity: Severity) -> &'static str {
        match severity {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    fn source(subject: &NotificationSubject) -> String {
        match subject {
            NotificationSubject::Deployment { service, region, .. } => format!("{service}/{region}"),
            NotificationSubject::Delivery { tenant, partner, .. } => format!("{tenant}/{partner}"),
        }
    }
}

#[async_trait]
impl NotificationChannel for PagerDutyChannel {
    fn name(&self) -> &str {
        "pagerduty"
    }

    fn matches(&self, event_kind: &str) -> bool {
        self.events.iter().any(|e| e == "all" || e == event_kind)
    }

    async fn send(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        let payload = json!({
            "routing_key": self.integration_key,
            "event_action": "trigger",
            "payload": {
                "summary": event.message,
                "source": Self::source(&event.subject),
                "severity": Self::severity(event.severity),
                "timestamp": event.timestamp.to_rfc3339(),
                "custom_details": { "kind": event.kind },
            }
        });

        self.client
            .post(ENQUEUE_URL)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}
