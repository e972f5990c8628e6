//! Outage alerting
//!
//! One notification per outage: once an alert has gone out (or failed to),
//! further raises are suppressed until the node reconnects.

pub mod mailer;

pub use mailer::{EmailMessage, LogMailer, Mailer, WebhookMailer};

use crate::common::{AlertConfig, ElectionMetrics, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Debounced outage notifier
pub struct Alerter {
    mailer: Arc<dyn Mailer>,
    identity: String,
    subject: String,
    recipients: Vec<String>,
    max_connect_wait: Duration,
    armed: AtomicBool,
    metrics: Arc<ElectionMetrics>,
}

impl Alerter {
    pub fn new(
        config: &AlertConfig,
        identity: impl Into<String>,
        mailer: Arc<dyn Mailer>,
        metrics: Arc<ElectionMetrics>,
    ) -> Self {
        Self {
            mailer,
            identity: identity.into(),
            subject: config.subject.clone(),
            recipients: config.recipient_list(),
            max_connect_wait: config.max_connect_wait,
            armed: AtomicBool::new(true),
            metrics,
        }
    }

    /// Pick the mailer the configuration asks for
    pub fn mailer_for(config: &AlertConfig) -> Result<Arc<dyn Mailer>> {
        Ok(match &config.webhook_url {
            Some(url) => Arc::new(WebhookMailer::new(url.clone())?),
            None => Arc::new(LogMailer),
        })
    }

    pub fn threshold(&self) -> Duration {
        self.max_connect_wait
    }

    /// Whether the next qualifying raise will send
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    /// Notify about an outage that has lasted `outage`.
    ///
    /// Returns `true` only for the call that actually attempted delivery.
    pub async fn raise(&self, outage: Duration) -> bool {
        if outage < self.max_connect_wait {
            return false;
        }
        if !self.armed.swap(false, Ordering::AcqRel) {
            return false;
        }

        let message = self.compose(outage);
        match self.mailer.send(&message).await {
            Ok(()) => {
                self.metrics.alerts_sent.inc();
                tracing::warn!(
                    node = %self.identity,
                    outage_secs = outage.as_secs(),
                    "coordination outage alert sent"
                );
            }
            Err(e) => {
                self.metrics.alerts_failed.inc();
                tracing::error!(node = %self.identity, error = %e, "failed to send outage alert");
            }
        }
        true
    }

    /// The node reconnected; the next outage may alert again
    pub fn resolve(&self) {
        if !self.armed.swap(true, Ordering::AcqRel) {
            tracing::info!(node = %self.identity, "coordination outage resolved, alerting re-armed");
        }
    }

    fn compose(&self, outage: Duration) -> EmailMessage {
        let since = chrono::Utc::now()
            - chrono::Duration::from_std(outage).unwrap_or_else(|_| chrono::Duration::zero());
        EmailMessage::new(self.subject.clone(), "text/html", self.recipients.clone()).with_body(
            format!(
                "<h2 style=\"color:#FF0000\">{} cannot reach the coordination service!</h2>\
                 <p>Disconnected since {} ({}s). Leadership is suspended on this node until it reconnects.</p>",
                self.identity,
                since.to_rfc3339(),
                outage.as_secs()
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Error;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        sent: Mutex<Vec<EmailMessage>>,
        fail: bool,
    }

    #[async_trait]
    impl Mailer for Recording {
        async fn send(&self, message: &EmailMessage) -> Result<()> {
            self.sent.lock().unwrap().push(message.clone());
            if self.fail {
                Err(Error::AlertDelivery("smtp down".into()))
            } else {
                Ok(())
            }
        }
    }

    fn alerter(mailer: Arc<Recording>) -> (Alerter, Arc<ElectionMetrics>) {
        let config = AlertConfig {
            max_connect_wait: Duration::from_secs(10),
            recipients: "ops@example.com,oncall@example.com".into(),
            ..Default::default()
        };
        let metrics = Arc::new(ElectionMetrics::new());
        (
            Alerter::new(&config, "10.0.0.5", mailer, metrics.clone()),
            metrics,
        )
    }

    #[tokio::test]
    async fn test_below_threshold_does_not_send() {
        let mailer = Arc::new(Recording::default());
        let (alerter, _) = alerter(mailer.clone());

        assert!(!alerter.raise(Duration::from_secs(9)).await);
        assert!(mailer.sent.lock().unwrap().is_empty());
        assert!(alerter.is_armed());
    }

    #[tokio::test]
    async fn test_debounced_until_resolved() {
        let mailer = Arc::new(Recording::default());
        let (alerter, metrics) = alerter(mailer.clone());

        assert!(alerter.raise(Duration::from_secs(10)).await);
        for secs in 11..50 {
            assert!(!alerter.raise(Duration::from_secs(secs)).await);
        }
        assert_eq!(mailer.sent.lock().unwrap().len(), 1);

        alerter.resolve();
        assert!(alerter.raise(Duration::from_secs(12)).await);
        assert_eq!(mailer.sent.lock().unwrap().len(), 2);
        assert_eq!(metrics.alerts_sent.get(), 2);
    }

    #[tokio::test]
    async fn test_message_contents() {
        let mailer = Arc::new(Recording::default());
        let (alerter, _) = alerter(mailer.clone());
        alerter.raise(Duration::from_secs(60)).await;

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent[0].content_type, "text/html");
        assert_eq!(sent[0].recipients, vec!["ops@example.com", "oncall@example.com"]);
        assert!(sent[0].body.contains("10.0.0.5"));
    }

    #[tokio::test]
    async fn test_delivery_failure_is_swallowed_and_still_debounced() {
        let mailer = Arc::new(Recording {
            fail: true,
            ..Default::default()
        });
        let (alerter, metrics) = alerter(mailer.clone());

        assert!(alerter.raise(Duration::from_secs(30)).await);
        assert!(!alerter.raise(Duration::from_secs(31)).await);
        assert_eq!(metrics.alerts_failed.get(), 1);
        assert_eq!(metrics.alerts_sent.get(), 0);
    }
}
