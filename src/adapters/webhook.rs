//! HTTP webhook publisher and the router choosing between webhook and SNS.
//!
//! Topics that look like URLs are POSTed to as JSON; anything else is
//! treated as an SNS topic ARN.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use super::{MessageBody, Notification, ProviderError, Publisher};

/// Payload POSTed to a webhook topic
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    subject: &'a str,
    message: &'a str,
    channels: &'a MessageBody,
}

/// Webhook client
pub struct WebhookPublisher {
    /// Optional bearer token
    token: Option<String>,
    client: reqwest::Client,
}

impl Default for WebhookPublisher {
    fn default() -> Self {
        Self::new(None)
    }
}

impl WebhookPublisher {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token,
            client: reqwest::Client::new(),
        }
    }

    /// Create from environment (`VOLSNAP_WEBHOOK_TOKEN` is optional)
    pub fn from_env() -> Self {
        Self::new(std::env::var("VOLSNAP_WEBHOOK_TOKEN").ok())
    }

    /// Whether a topic should be delivered over HTTP
    pub fn handles(topic: &str) -> bool {
        topic.starts_with("https://") || topic.starts_with("http://")
    }
}

#[async_trait]
impl Publisher for WebhookPublisher {
    async fn publish(
        &self,
        topic: &str,
        notification: &Notification,
    ) -> Result<(), ProviderError> {
        let payload = WebhookPayload {
            subject: &notification.subject,
            message: &notification.body.default,
            channels: &notification.body,
        };

        let mut request = self.client.post(topic).json(&payload);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable {
                operation: "webhook publish".to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            let operation = "webhook publish".to_string();
            let message = format!("{}: {}", status, text);
            if status.as_u16() == 429 {
                Err(ProviderError::Throttled { operation, message })
            } else {
                Err(ProviderError::Api { operation, message })
            }
        }
    }
}

/// Dispatches each topic to the webhook or the SNS publisher
pub struct TopicRouter {
    sns: Arc<dyn Publisher>,
    webhook: Arc<dyn Publisher>,
}

impl TopicRouter {
    pub fn new(sns: Arc<dyn Publisher>, webhook: Arc<dyn Publisher>) -> Self {
        Self { sns, webhook }
    }
}

#[async_trait]
impl Publisher for TopicRouter {
    async fn publish(
        &self,
        topic: &str,
        notification: &Notification,
    ) -> Result<(), ProviderError> {
        if WebhookPublisher::handles(topic) {
            self.webhook.publish(topic, notification).await
        } else {
            self.sns.publish(topic, notification).await
        }
    }
}
