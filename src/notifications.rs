//! Fan-out notification dispatch: email, webhook, and chat channels.
//!
//! A failed channel never blocks the others; per-channel failures are
//! recorded on the event's metadata rather than aborting the fan-out
//! (spec.md §4.12).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::alerts::AlertTrigger;
use crate::error::Result;

/// A small closed set of metadata value types, replacing a
/// dynamically-typed bag with something serializable and exhaustively
/// matchable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Text(String),
    Number(f64),
    Flag(bool),
}

/// Severity used to pick the chat channel's accent color and to shape
/// the subject line for `send_alert`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Who an email notification should reach.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Recipients {
    pub to: Vec<String>,
    pub cc: Vec<String>,
}

/// A normalized notification, ready to fan out to every configured
/// channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub event_type: String,
    pub subject: String,
    pub body: String,
    pub severity: Severity,
    pub recipients: Recipients,
    pub metadata: HashMap<String, MetadataValue>,
    /// Absolute path to a log file to attach, where the channel
    /// supports attachments (email only).
    pub attachment: Option<std::path::PathBuf>,
}

/// Capability every notification channel implements.
#[async_trait]
pub trait Channel: Send + Sync {
    async fn send(&self, event: &NotificationEvent) -> Result<()>;
    fn name(&self) -> &str;
}

/// Fans an event out to every configured channel, recording per-channel
/// failures without letting one channel's error affect the others.
pub struct NotificationManager {
    channels: Vec<Box<dyn Channel>>,
}

impl NotificationManager {
    pub fn new(channels: Vec<Box<dyn Channel>>) -> Self {
        Self { channels }
    }

    /// Send a freeform notification to every channel. Returns the
    /// names of channels that failed, with their error messages.
    pub async fn send(
        &self,
        event_type: &str,
        subject: &str,
        body: &str,
        metadata: Option<HashMap<String, MetadataValue>>,
    ) -> Vec<(String, String)> {
        let event = NotificationEvent {
            event_type: event_type.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            severity: Severity::Info,
            recipients: Recipients::default(),
            metadata: metadata.unwrap_or_default(),
            attachment: None,
        };
        self.dispatch(&event).await
    }

    /// Send a normalized alert-trigger notification.
    pub async fn send_alert(&self, trigger: &AlertTrigger) -> Vec<(String, String)> {
        let event = NotificationEvent {
            event_type: "alert".to_string(),
            subject: format!("[alert] {}", trigger.rule_name),
            body: trigger.message.clone(),
            severity: trigger.severity,
            recipients: Recipients::default(),
            metadata: HashMap::new(),
            attachment: None,
        };
        self.dispatch(&event).await
    }

    async fn dispatch(&self, event: &NotificationEvent) -> Vec<(String, String)> {
        let mut failures = Vec::new();
        for channel in &self.channels {
            if let Err(e) = channel.send(event).await {
                tracing::warn!(channel = channel.name(), error = %e, "notification channel failed");
                failures.push((channel.name().to_string(), e.to_string()));
            }
        }
        failures
    }
}

/// SMTP email channel. Ok iff the MTA accepts the envelope.
pub struct EmailChannel {
    transport: lettre::AsyncSmtpTransport<lettre::Tokio1Executor>,
    from_address: String,
}

impl EmailChannel {
    pub fn new(
        smtp_host: &str,
        smtp_port: u16,
        starttls: bool,
        username: &str,
        password: &str,
        from_address: String,
    ) -> Result<Self> {
        use lettre::transport::smtp::authentication::Credentials;

        let credentials = Credentials::new(username.to_string(), password.to_string());
        let builder = if starttls {
            lettre::AsyncSmtpTransport::<lettre::Tokio1Executor>::starttls_relay(smtp_host)
        } else {
            lettre::AsyncSmtpTransport::<lettre::Tokio1Executor>::relay(smtp_host)
        }
        .map_err(|e| crate::error::BackupError::Connectivity(e.to_string()))?;

        let transport = builder
            .port(smtp_port)
            .credentials(credentials)
            .build();

        Ok(Self {
            transport,
            from_address,
        })
    }
}

#[async_trait]
impl Channel for EmailChannel {
    async fn send(&self, event: &NotificationEvent) -> Result<()> {
        use lettre::message::{Attachment, MultiPart, SinglePart};
        use lettre::{AsyncTransport, Message};

        if event.recipients.to.is_empty() {
            return Err(crate::error::BackupError::Config(
                "email notification has no recipients".to_string(),
            ));
        }

        let mut builder = Message::builder()
            .from(self.from_address.parse().map_err(|e: lettre::address::AddressError| {
                crate::error::BackupError::Config(e.to_string())
            })?)
            .subject(sanitize_header(&event.subject));

        for to in &event.recipients.to {
            builder = builder.to(to.parse().map_err(|e: lettre::address::AddressError| {
                crate::error::BackupError::Config(e.to_string())
            })?);
        }
        for cc in &event.recipients.cc {
            builder = builder.cc(cc.parse().map_err(|e: lettre::address::AddressError| {
                crate::error::BackupError::Config(e.to_string())
            })?);
        }

        let html_body = format!("<html><body><pre>{}</pre></body></html>", html_escape(&event.body));

        let message = if let Some(attachment_path) = &event.attachment {
            let bytes = tokio::fs::read(attachment_path)
                .await
                .map_err(|e| crate::error::BackupError::Connectivity(e.to_string()))?;
            let filename = attachment_path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("attachment.log")
                .to_string();
            let attachment = Attachment::new(filename)
                .body(bytes, "text/plain".parse().unwrap());

            builder
                .multipart(
                    MultiPart::mixed()
                        .singlepart(SinglePart::html(html_body))
                        .singlepart(attachment),
                )
                .map_err(|e| crate::error::BackupError::Connectivity(e.to_string()))?
        } else {
            builder
                .singlepart(SinglePart::html(html_body))
                .map_err(|e| crate::error::BackupError::Connectivity(e.to_string()))?
        };

        lettre::AsyncTransport::send(&self.transport, message)
            .await
            .map_err(|e| crate::error::BackupError::Connectivity(e.to_string()))?;

        Ok(())
    }

    fn name(&self) -> &str {
        "email"
    }
}

fn sanitize_header(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

fn html_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// HTTP webhook channel: posts a normalized JSON envelope, retrying on
/// 5xx responses with bounded exponential backoff.
pub struct WebhookChannel {
    client: reqwest::Client,
    url: String,
    max_attempts: u32,
}

impl WebhookChannel {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            max_attempts: 4,
        }
    }
}

#[async_trait]
impl Channel for WebhookChannel {
    async fn send(&self, event: &NotificationEvent) -> Result<()> {
        let payload = serde_json::json!({
            "event_type": event.event_type,
            "subject": event.subject,
            "body": event.body,
            "severity": event.severity,
            "metadata": event.metadata,
        });

        let mut delay = Duration::from_millis(200);
        let mut last_status = None;

        for attempt in 1..=self.max_attempts {
            let response = self
                .client
                .post(&self.url)
                .json(&payload)
                .send()
                .await
                .map_err(|e| crate::error::BackupError::Connectivity(e.to_string()))?;

            let status = response.status();
            if status.is_success() {
                return Ok(());
            }
            if !status.is_server_error() {
                return Err(crate::error::BackupError::Operation {
                    step: "webhook".to_string(),
                    message: format!("non-retryable status {status}"),
                });
            }

            last_status = Some(status);
            if attempt < self.max_attempts {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }

        Err(crate::error::BackupError::Connectivity(format!(
            "webhook failed after {} attempts, last status {:?}",
            self.max_attempts, last_status
        )))
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

/// Slack-shaped incoming webhook with a severity-mapped accent color.
pub struct ChatChannel {
    client: reqwest::Client,
    url: String,
}

impl ChatChannel {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }

    fn color_for(severity: Severity) -> &'static str {
        match severity {
            Severity::Info => "#2eb67d",
            Severity::Warning => "#ecb22e",
            Severity::Error => "#d94f2b",
            Severity::Critical => "#e01e5a",
        }
    }
}

#[async_trait]
impl Channel for ChatChannel {
    async fn send(&self, event: &NotificationEvent) -> Result<()> {
        let payload = serde_json::json!({
            "attachments": [{
                "color": Self::color_for(event.severity),
                "title": event.subject,
                "text": event.body,
            }]
        });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| crate::error::BackupError::Connectivity(e.to_string()))?;

        if !response.status().is_success() {
            return Err(crate::error::BackupError::Connectivity(format!(
                "chat webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "chat"
    }
}
