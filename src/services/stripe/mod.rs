// NOTE: async-stripe is compiled with a minimal feature set (runtime-tokio-hyper, billing,
// and webhook-events). Touching APIs outside those features will require
// updating Cargo.toml explicitly so we keep compile times and binary size in check.
use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum StripeServiceError {
    #[error("stripe api error: {0}")]
    Api(String),
    #[error("webhook verification failed: {0}")]
    Webhook(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("stripe request timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("other error: {0}")]
    Other(String),
}

impl From<stripe::StripeError> for StripeServiceError {
    fn from(err: stripe::StripeError) -> Self {
        StripeServiceError::Api(err.to_string())
    }
}

impl From<stripe::WebhookError> for StripeServiceError {
    fn from(err: stripe::WebhookError) -> Self {
        StripeServiceError::Webhook(err.to_string())
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    Day,
    Week,
    Month,
    Year,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecurringInfo {
    pub interval: BillingInterval,
    pub interval_count: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionInfo {
    pub id: String,
    pub customer_id: String,
    pub status: String,
    /// Unix timestamp (seconds) when the subscription was created
    pub created: i64,
    /// Unix timestamp (seconds) when the current period started
    pub current_period_start: Option<i64>,
    /// Unix timestamp (seconds) when the current period ends. Absent on some
    /// list responses.
    pub current_period_end: Option<i64>,
    pub trial_end: Option<i64>,
    /// Product of the first subscription item
    pub product_id: Option<String>,
    pub recurring: Option<RecurringInfo>,
}

impl SubscriptionInfo {
    pub fn is_trialing(&self) -> bool {
        self.status == "trialing"
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProductInfo {
    pub id: String,
    pub name: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CustomerInfo {
    pub id: String,
    pub email: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    pub r#type: String,
    pub created: i64,
    /// The delivery body exactly as received.
    pub payload: serde_json::Value,
}

impl StripeEvent {
    pub fn from_payload(payload: &[u8]) -> Result<Self, StripeServiceError> {
        let payload: serde_json::Value =
            serde_json::from_slice(payload).map_err(|e| StripeServiceError::Serde(e.to_string()))?;
        Ok(StripeEvent {
            id: payload["id"].as_str().unwrap_or_default().to_string(),
            r#type: payload["type"].as_str().unwrap_or_default().to_string(),
            created: payload["created"].as_i64().unwrap_or_default(),
            payload,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionStatusFilter {
    Active,
    Trialing,
}

#[async_trait]
pub trait StripeService: Send + Sync {
    async fn find_customer_by_email(
        &self,
        email: &str,
    ) -> Result<Option<CustomerInfo>, StripeServiceError>;

    async fn retrieve_customer(&self, customer_id: &str)
        -> Result<CustomerInfo, StripeServiceError>;

    async fn list_subscriptions(
        &self,
        customer_id: &str,
        status: SubscriptionStatusFilter,
    ) -> Result<Vec<SubscriptionInfo>, StripeServiceError>;

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<SubscriptionInfo, StripeServiceError>;

    async fn retrieve_product(&self, product_id: &str) -> Result<ProductInfo, StripeServiceError>;

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<StripeEvent, StripeServiceError>;
}

mod live;
#[cfg(test)]
mod mock;

pub use live::LiveStripeService;
#[cfg(test)]
pub use mock::{MockStripeService, MOCK_VALID_SIGNATURE};
