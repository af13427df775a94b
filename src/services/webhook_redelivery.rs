use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;

use crate::models::webhook_attempt::WebhookAttempt;

/// Marks a delivery as coming from the retry scheduler rather than Stripe.
pub const RETRY_HEADER: &str = "x-webhook-retry";
pub const ORIGINAL_EVENT_HEADER: &str = "x-original-event-id";

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("intake request timed out")]
    Timeout,
    #[error("intake request failed: {0}")]
    Transport(String),
    #[error("intake rejected the event with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WebhookRedelivery: Send + Sync {
    /// Re-posts the stored payload to the intake endpoint.
    async fn redeliver(&self, attempt: &WebhookAttempt) -> Result<(), DeliveryError>;
}

pub struct HttpWebhookRedelivery {
    client: Client,
    intake_url: String,
    service_key: String,
}

impl HttpWebhookRedelivery {
    pub fn new(
        intake_url: impl Into<String>,
        service_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            intake_url: intake_url.into(),
            service_key: service_key.into(),
        })
    }
}

#[async_trait]
impl WebhookRedelivery for HttpWebhookRedelivery {
    async fn redeliver(&self, attempt: &WebhookAttempt) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.intake_url)
            .bearer_auth(&self.service_key)
            .header(RETRY_HEADER, "true")
            .header(ORIGINAL_EVENT_HEADER, &attempt.stripe_event_id)
            .json(&attempt.request_payload)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    DeliveryError::Timeout
                } else {
                    DeliveryError::Transport(err.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let mut body = response.text().await.unwrap_or_default();
        body.truncate(500);
        Err(DeliveryError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}
