//! Mail delivery backends

use crate::common::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A notification ready to send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub subject: String,
    pub content_type: String,
    pub body: String,
    pub recipients: Vec<String>,
}

impl EmailMessage {
    pub fn new(subject: impl Into<String>, content_type: impl Into<String>, recipients: Vec<String>) -> Self {
        Self {
            subject: subject.into(),
            content_type: content_type.into(),
            body: String::new(),
            recipients,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }
}

/// Outbound mail collaborator. Delivery errors are reported, never retried here.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Writes notifications to the log instead of sending them
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        tracing::warn!(
            subject = %message.subject,
            recipients = ?message.recipients,
            "alert (no mail relay configured): {}",
            message.body
        );
        Ok(())
    }
}

/// Posts notifications as JSON to an HTTP mail relay
#[derive(Debug, Clone)]
pub struct WebhookMailer {
    client: reqwest::Client,
    url: String,
}

impl WebhookMailer {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Mailer for WebhookMailer {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        if message.recipients.is_empty() {
            return Err(Error::AlertDelivery("no recipients".into()));
        }
        self.client
            .post(&self.url)
            .json(message)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
