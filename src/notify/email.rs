//! Email channel: SMTP relay via `lettre`, body rendered through a
//! `handlebars` template the way the teacher's report-delivery email
//! path does it.

use async_trait::async_trait;
use handlebars::Handlebars;
use lettre::message::header;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde_json::json;

use crate::domain::NotificationEvent;

use super::{NotificationChannel, NotifyError};

const TEMPLATE: &str = r#"<html><body>
<h2>{{kind}}</h2>
<p><strong>Severity:</strong> {{severity}}</p>
<p>{{message}}</p>
<p><small>{{timestamp}}</small></p>
</body></html>"#;

pub struct EmailChannel {
    recipients: Vec<String>,
    events: Vec<String>,
    templates: Handlebars<'static>,
}

impl EmailChannel {
    pub fn new(recipients: Vec<String>, events: Vec<String>) -> Self {
        let mut templates = Handlebars::new();
        templates
            .register_template_string("event", TEMPLATE)
            .expect("static template always compiles");
        Self { recipients, events, templates }
    }

    fn render(&self, event: &NotificationEvent) -> Result<String, NotifyError> {
        let data = json!({
            "kind": event.kind,
            "severity": format!("{:?}", event.severity),
            "message": event.message,
            "timestamp": event.timestamp.to_rfc3339(),
        });
        self.templates
            .render("event", &data)
            .map_err(|e| NotifyError::Template(e.to_string()))
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    fn matches(&self, event_kind: &str) -> bool {
        self.events.iter().any(|e| e == "all" || e == event_kind)
    }

    async fn send(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        let body = self.render(event)?;
        let from_address = std::env::var("NOTIFY_EMAIL_FROM").unwrap_or_else(|_| "control-plane@localhost".into());
        let smtp_host = std::env::var("SMTP_HOST").unwrap_or_else(|_| "localhost".into());

        let mut builder = Message::builder()
            .from(from_address.parse().map_err(|e| NotifyError::Smtp(format!("invalid from address: {e}")))?)
            .subject(format!("[{:?}] {}", event.severity, event.kind));

        for recipient in &self.recipients {
            builder = builder.to(recipient
                .parse()
                .map_err(|e| NotifyError::Smtp(format!("invalid recipient {recipient}: {e}")))?);
        }

        let message = builder
            .header(header::ContentType::TEXT_HTML)
            .body(body)
            .map_err(|e| NotifyError::Smtp(format!("failed to build message: {e}")))?;

        let mut transport_builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp_host)
            .map_err(|e| NotifyError::Smtp(format!("failed to create smtp transport: {e}")))?;

        if let (Ok(user), Ok(pass)) = (std::env::var("SMTP_USERNAME"), std::env::var("SMTP_PASSWORD")) {
            transport_builder = transport_builder.credentials(Credentials::new(user, pass));
        }

        let mailer = transport_builder.build();
        mailer
            .send(message)
            .await
            .map_err(|e| NotifyError::Smtp(format!("failed to send email: {e}")))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NotificationSubject, Severity};
    use uuid::Uuid;

    #[test]
    fn renders_event_into_html_body() {
        let channel = EmailChannel::new(vec!["ops@example.com".into()], vec!["all".into()]);
        let event = NotificationEvent::new(
            "rollback",
            NotificationSubject::Deployment {
                id: Uuid::new_v4(),
                service: "api".into(),
                version: "v2".into(),
                region: "us-east-1".into(),
            },
            Severity::Critical,
            "rolled back: error_rate > 0.05",
        );
        let body = channel.render(&event).unwrap();
        assert!(body.contains("rollback"));
        assert!(body.contains("rolled back"));
    }
}
