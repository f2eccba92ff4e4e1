use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::error::NotifyError;
use super::types::{EmailMessage, InAppNotification};

/// Delivery channel for in-app notification objects. The actual rendering
/// lives in the host platform; this core only hands the object over.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: &InAppNotification) -> Result<(), NotifyError>;
}

/// Outbound mail channel. Message composition happens in the dispatcher;
/// the transport only carries the finished message.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), NotifyError>;
}

/// Posts notification objects as JSON to the host platform's ingest URL.
pub struct HttpNotificationSink {
    http_client: Client,
    endpoint: String,
}

impl HttpNotificationSink {
    pub fn new(endpoint: String, timeout_secs: u64) -> anyhow::Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .pool_max_idle_per_host(4)
            .build()?;

        Ok(Self {
            http_client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl NotificationSink for HttpNotificationSink {
    async fn notify(&self, notification: &InAppNotification) -> Result<(), NotifyError> {
        let response = self
            .http_client
            .post(&self.endpoint)
            .json(notification)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
            });
        }

        debug!(
            notification_id = %notification.id,
            account_id = %notification.account_id,
            "delivered in-app notification"
        );
        Ok(())
    }
}

/// Posts finished email messages as JSON to a mail gateway.
pub struct HttpMailer {
    http_client: Client,
    endpoint: String,
}

impl HttpMailer {
    pub fn new(endpoint: String, timeout_secs: u64) -> anyhow::Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .pool_max_idle_per_host(4)
            .build()?;

        Ok(Self {
            http_client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl EmailTransport for HttpMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), NotifyError> {
        let response = self
            .http_client
            .post(&self.endpoint)
            .json(message)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
            });
        }

        debug!(to = %message.to, subject = %message.subject, "handed email to gateway");
        Ok(())
    }
}

/// Fallback sink when no notification endpoint is configured.
pub struct LogOnlySink;

#[async_trait]
impl NotificationSink for LogOnlySink {
    async fn notify(&self, notification: &InAppNotification) -> Result<(), NotifyError> {
        debug!(
            account_id = %notification.account_id,
            subject = %notification.subject,
            percent = notification.percent,
            "no notification sink configured, logging only"
        );
        Ok(())
    }
}

/// Fallback mailer when no mail gateway is configured.
pub struct LogOnlyMailer;

#[async_trait]
impl EmailTransport for LogOnlyMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), NotifyError> {
        debug!(to = %message.to, subject = %message.subject, "no mail gateway configured, logging only");
        Ok(())
    }
}
