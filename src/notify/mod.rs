//! Component H — Notification Fan-out.
//!
//! `dispatch(event)` evaluates every configured channel's event filter
//! and sends to all matches in parallel, waiting for every outcome.
//! Channel failures are logged, never propagated — one misconfigured
//! webhook must not stop the others, let alone the caller.

mod email;
mod pagerduty;
mod slack;

pub use email::EmailChannel;
pub use pagerduty::PagerDutyChannel;
pub use slack::SlackChannel;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use crate::config::NotificationsConfig;
use crate::domain::NotificationEvent;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("smtp error: {0}")]
    Smtp(String),
    #[error("template render error: {0}")]
    Template(String),
}

/// One outbound channel. `matches` decides whether a given event is
/// even worth attempting; `send` does the actual dispatch.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;
    fn matches(&self, event_kind: &str) -> bool;
    async fn send(&self, event: &NotificationEvent) -> Result<(), NotifyError>;
}

/// Owns the configured channel set and fans events out to all matches
/// in parallel via `futures::future::join_all`.
#[derive(Clone, Default)]
pub struct NotificationDispatcher {
    channels: Vec<Arc<dyn NotificationChannel>>,
}

impl NotificationDispatcher {
    pub fn new(channels: Vec<Arc<dyn NotificationChannel>>) -> Self {
        Self { channels }
    }

    /// Builds the channel set straight from the `notifications:` config
    /// block, reading the Slack webhook URL from the environment per
    /// the secrets table in §6.
    pub fn from_config(config: &NotificationsConfig) -> Self {
        let mut channels: Vec<Arc<dyn NotificationChannel>> = Vec::new();

        if let Some(slack) = &config.slack {
            if slack.enabled {
                if let Ok(webhook_url) = std::env::var("SLACK_WEBHOOK_URL") {
                    channels.push(Arc::new(SlackChannel::new(webhook_url, slack.channels.clone())));
                } else {
                    warn!("slack notifications enabled but SLACK_WEBHOOK_URL is unset; channel disabled");
                }
            }
        }

        if let Some(pagerduty) = &config.pagerduty {
            if pagerduty.enabled {
                channels.push(Arc::new(PagerDutyChannel::new(
                    pagerduty.integration_key.clone(),
                    pagerduty.events.clone(),
                )));
            }
        }

        if let Some(email) = &config.email {
            if email.enabled {
                channels.push(Arc::new(EmailChannel::new(
                    email.recipients.clone(),
                    email.events.clone(),
                )));
            }
        }

        Self::new(channels)
    }

    /// Evaluates every channel's filter and dispatches matches in
    /// parallel. Never returns an error: a channel failure is logged
    /// and otherwise swallowed, per the fan-out contract.
    pub async fn dispatch(&self, event: NotificationEvent) {
        let sends = self
            .channels
            .iter()
            .filter(|channel| channel.matches(&event.kind))
            .map(|channel| {
                let channel = channel.clone();
                let event = event.clone();
                async move {
                    if let Err(e) = channel.send(&event).await {
                        warn!(channel = channel.name(), error = %e, kind = %event.kind, "notification channel failed");
                    }
                }
            });

        futures::future::join_all(sends).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NotificationSubject, Severity};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct CountingChannel {
        kind: &'static str,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl NotificationChannel for CountingChannel {
        fn name(&self) -> &str {
            "counting"
        }

        fn matches(&self, event_kind: &str) -> bool {
            event_kind == self.kind
        }

        async fn send(&self, _event: &NotificationEvent) -> Result<(), NotifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn only_matching_channels_receive_the_event() {
        let start_calls = Arc::new(AtomicUsize::new(0));
        let rollback_calls = Arc::new(AtomicUsize::new(0));

        let dispatcher = NotificationDispatcher::new(vec![
            Arc::new(CountingChannel { kind: "start", calls: start_calls.clone() }),
            Arc::new(CountingChannel { kind: "rollback", calls: rollback_calls.clone() }),
        ]);

        let event = NotificationEvent::new(
            "start",
            NotificationSubject::Deployment {
                id: Uuid::new_v4(),
                service: "api".into(),
                version: "v2".into(),
                region: "us-east-1".into(),
            },
            Severity::Info,
            "deployment started",
        );

        dispatcher.dispatch(event).await;

        assert_eq!(start_calls.load(Ordering::SeqCst), 1);
        assert_eq!(rollback_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn channel_failure_does_not_stop_others() {
        struct FailingChannel;
        #[async_trait]
        impl NotificationChannel for FailingChannel {
            fn name(&self) -> &str {
                "failing"
            }
            fn matches(&self, _event_kind: &str) -> bool {
                true
            }
            async fn send(&self, _event: &NotificationEvent) -> Result<(), NotifyError> {
                Err(NotifyError::Smtp("boom".into()))
            }
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = NotificationDispatcher::new(vec![
            Arc::new(FailingChannel),
            Arc::new(CountingChannel { kind: "rollback", calls: calls.clone() }),
        ]);

        let event = NotificationEvent::new(
            "rollback",
            NotificationSubject::Deployment {
                id: Uuid::new_v4(),
                service: "api".into(),
                version: "v2".into(),
                region: "us-east-1".into(),
            },
            Severity::Critical,
            "rolled back",
        );

        dispatcher.dispatch(event).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
