//! Outbound message transports.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{TransportKind, TransportSettings};
use crate::error::{ReportesError, Result};
use crate::telemetry::{mask_email, SensitiveFieldRedactor};

/// A binary file attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// One outbound notification.
#[derive(Debug, Clone)]
pub struct DeliveryMessage {
    pub id: Uuid,
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachment: Option<Attachment>,
    pub created_at: DateTime<Utc>,
}

impl DeliveryMessage {
    pub fn new(
        recipients: Vec<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            recipients,
            subject: subject.into(),
            body: body.into(),
            attachment: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    /// Recipients masked for logging.
    pub fn masked_recipients(&self) -> String {
        self.recipients
            .iter()
            .map(|r| mask_email(r))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Sends one message to a downstream dependency.
///
/// Implementations classify failures: transient ones (`TransientDelivery`,
/// `NetworkError`, `Timeout`) are retried, anything else is final.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    /// Name used for logs, metrics and the breaker.
    fn name(&self) -> &str;

    async fn send(&self, message: &DeliveryMessage) -> Result<()>;
}

/// Build the configured transport.
pub fn build_transport(settings: &TransportSettings) -> Result<Arc<dyn DeliveryTransport>> {
    match settings.kind {
        TransportKind::Log => Ok(Arc::new(LogTransport::new("email"))),
        TransportKind::Webhook => {
            let url = settings.url.clone().ok_or_else(|| {
                ReportesError::configuration("delivery.transport.url is required for webhook delivery")
            })?;
            Ok(Arc::new(WebhookTransport::new(
                "email",
                url,
                settings.sender.clone(),
                settings.request_timeout,
            )?))
        }
    }
}

/// Logs messages instead of sending them. Always succeeds.
#[derive(Debug, Clone)]
pub struct LogTransport {
    name: String,
}

impl LogTransport {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl DeliveryTransport for LogTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &DeliveryMessage) -> Result<()> {
        tracing::info!(
            transport = %self.name,
            message_id = %message.id,
            recipients = %message.masked_recipients(),
            subject = %SensitiveFieldRedactor::global().redact_value(&message.subject),
            attachment = ?message.attachment.as_ref().map(|a| &a.filename),
            "Message delivered to log transport"
        );
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub id: Uuid,
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<WebhookAttachment>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookAttachment {
    pub filename: String,
    pub content_type: String,
    /// Standard base64
    pub content: String,
}

/// POSTs messages as JSON to an HTTP endpoint.
///
/// 5xx, 429, timeouts and connection errors are transient; other 4xx
/// responses are rejections.
#[derive(Debug, Clone)]
pub struct WebhookTransport {
    name: String,
    url: String,
    sender: String,
    client: reqwest::Client,
}

impl WebhookTransport {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        sender: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            name: name.into(),
            url: url.into(),
            sender: sender.into(),
            client,
        })
    }

    fn payload(&self, message: &DeliveryMessage) -> WebhookPayload {
        WebhookPayload {
            id: message.id,
            from: self.sender.clone(),
            to: message.recipients.clone(),
            subject: message.subject.clone(),
            body: message.body.clone(),
            attachment: message.attachment.as_ref().map(|a| WebhookAttachment {
                filename: a.filename.clone(),
                content_type: a.content_type.clone(),
                content: base64::engine::general_purpose::STANDARD.encode(&a.data),
            }),
        }
    }
}

#[async_trait]
impl DeliveryTransport for WebhookTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &DeliveryMessage) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&self.payload(message))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(
                transport = %self.name,
                message_id = %message.id,
                status = status.as_u16(),
                "Webhook accepted message"
            );
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let reason = format!("HTTP {}: {}", status.as_u16(), body.chars().take(200).collect::<String>());

        if status.is_server_error() || status.as_u16() == 429 {
            Err(ReportesError::transient_delivery(&self.name, reason))
        } else {
            Err(ReportesError::delivery_rejected(&self.name, reason))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masked_recipients() {
        let message = DeliveryMessage::new(
            vec!["ana@example.com".to_string(), "luis@example.org".to_string()],
            "Subject",
            "Body",
        );

        assert_eq!(message.masked_recipients(), "a***@example.com, l***@example.org");
    }

    #[test]
    fn test_webhook_payload_encodes_attachment() {
        let transport = WebhookTransport::new(
            "email",
            "http://localhost/hook",
            "no-reply@reportes.local",
            Duration::from_secs(1),
        )
        .unwrap();
        let message = DeliveryMessage::new(vec!["a@b.io".to_string()], "s", "b").with_attachment(
            Attachment {
                filename: "reporte.json".to_string(),
                content_type: "application/json".to_string(),
                data: b"{}".to_vec(),
            },
        );

        let payload = transport.payload(&message);
        let attachment = payload.attachment.unwrap();
        assert_eq!(attachment.content, "e30=");
        assert_eq!(payload.from, "no-reply@reportes.local");
    }

    #[tokio::test]
    async fn test_log_transport_accepts() {
        let transport = LogTransport::new("email");
        let message = DeliveryMessage::new(vec!["a@b.io".to_string()], "s", "b");

        assert!(transport.send(&message).await.is_ok());
        assert_eq!(transport.name(), "email");
    }

    #[test]
    fn test_build_webhook_requires_url() {
        let settings = TransportSettings {
            kind: TransportKind::Webhook,
            ..TransportSettings::default()
        };

        assert!(build_transport(&settings).is_err());
    }
}
