use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{
    BillingInterval, CustomerInfo, ProductInfo, RecurringInfo, StripeEvent, StripeService,
    StripeServiceError, SubscriptionInfo, SubscriptionStatusFilter,
};

#[derive(Clone, Default)]
pub struct MockStripeService {
    pub customers: Arc<Mutex<Vec<CustomerInfo>>>,
    pub subscriptions: Arc<Mutex<Vec<SubscriptionInfo>>>,
    /// Full objects returned by `retrieve_subscription` when they differ from
    /// what the list call returns.
    pub full_subscriptions: Arc<Mutex<HashMap<String, SubscriptionInfo>>>,
    pub products: Arc<Mutex<HashMap<String, ProductInfo>>>,
    pub failing_emails: Arc<Mutex<HashSet<String>>>,
    pub list_calls: Arc<Mutex<usize>>,
    pub retrieve_calls: Arc<Mutex<usize>>,
}

/// The only `Stripe-Signature` value the mock accepts.
pub const MOCK_VALID_SIGNATURE: &str = "t=1,v1=mock";

impl MockStripeService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Monthly subscription with a period ending 30 days after `created`.
    pub fn subscription(id: &str, customer_id: &str, status: &str, product_id: &str) -> SubscriptionInfo {
        let created = 1_735_689_600; // 2025-01-01T00:00:00Z
        SubscriptionInfo {
            id: id.to_string(),
            customer_id: customer_id.to_string(),
            status: status.to_string(),
            created,
            current_period_start: Some(created),
            current_period_end: Some(created + 30 * 86_400),
            trial_end: None,
            product_id: Some(product_id.to_string()),
            recurring: Some(RecurringInfo {
                interval: BillingInterval::Month,
                interval_count: 1,
            }),
        }
    }

    pub fn add_customer(&self, id: &str, email: &str) {
        self.customers.lock().unwrap().push(CustomerInfo {
            id: id.to_string(),
            email: Some(email.to_string()),
        });
    }

    pub fn add_subscription(&self, sub: SubscriptionInfo) {
        self.subscriptions.lock().unwrap().push(sub);
    }

    pub fn set_full_subscription(&self, sub: SubscriptionInfo) {
        self.full_subscriptions
            .lock()
            .unwrap()
            .insert(sub.id.clone(), sub);
    }

    pub fn add_product(&self, id: &str, name: &str, tier: Option<&str>) {
        let mut metadata = BTreeMap::new();
        if let Some(tier) = tier {
            metadata.insert("tier".to_string(), tier.to_string());
        }
        self.products.lock().unwrap().insert(
            id.to_string(),
            ProductInfo {
                id: id.to_string(),
                name: Some(name.to_string()),
                metadata,
            },
        );
    }

    pub fn fail_for_email(&self, email: &str) {
        self.failing_emails.lock().unwrap().insert(email.to_string());
    }

    pub fn clear_subscriptions(&self) {
        self.subscriptions.lock().unwrap().clear();
        self.full_subscriptions.lock().unwrap().clear();
    }
}

#[async_trait]
impl StripeService for MockStripeService {
    async fn find_customer_by_email(
        &self,
        email: &str,
    ) -> Result<Option<CustomerInfo>, StripeServiceError> {
        if self.failing_emails.lock().unwrap().contains(email) {
            return Err(StripeServiceError::Api("simulated stripe outage".into()));
        }
        Ok(self
            .customers
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.email.as_deref() == Some(email))
            .cloned())
    }

    async fn retrieve_customer(
        &self,
        customer_id: &str,
    ) -> Result<CustomerInfo, StripeServiceError> {
        self.customers
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == customer_id)
            .cloned()
            .ok_or_else(|| StripeServiceError::NotFound(customer_id.to_string()))
    }

    async fn list_subscriptions(
        &self,
        customer_id: &str,
        status: SubscriptionStatusFilter,
    ) -> Result<Vec<SubscriptionInfo>, StripeServiceError> {
        *self.list_calls.lock().unwrap() += 1;
        let wanted = match status {
            SubscriptionStatusFilter::Active => "active",
            SubscriptionStatusFilter::Trialing => "trialing",
        };
        Ok(self
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.customer_id == customer_id && s.status == wanted)
            .cloned()
            .collect())
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<SubscriptionInfo, StripeServiceError> {
        *self.retrieve_calls.lock().unwrap() += 1;
        if let Some(full) = self.full_subscriptions.lock().unwrap().get(subscription_id) {
            return Ok(full.clone());
        }
        self.subscriptions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == subscription_id)
            .cloned()
            .ok_or_else(|| StripeServiceError::NotFound(subscription_id.to_string()))
    }

    async fn retrieve_product(&self, product_id: &str) -> Result<ProductInfo, StripeServiceError> {
        self.products
            .lock()
            .unwrap()
            .get(product_id)
            .cloned()
            .ok_or_else(|| StripeServiceError::NotFound(product_id.to_string()))
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<StripeEvent, StripeServiceError> {
        if signature_header != MOCK_VALID_SIGNATURE {
            return Err(StripeServiceError::Webhook("signature mismatch".into()));
        }
        StripeEvent::from_payload(payload)
    }
}
