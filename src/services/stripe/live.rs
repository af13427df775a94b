use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use super::{
    BillingInterval, CustomerInfo, ProductInfo, RecurringInfo, StripeEvent, StripeService,
    StripeServiceError, SubscriptionInfo, SubscriptionStatusFilter,
};
use crate::config::StripeSettings;

pub struct LiveStripeService {
    client: stripe::Client,
    webhook_secret: String,
    timeout: Duration,
}

impl LiveStripeService {
    pub fn new(
        secret_key: impl Into<String>,
        webhook_secret: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let client = stripe::Client::new(secret_key);
        Self {
            client,
            webhook_secret: webhook_secret.into(),
            timeout,
        }
    }

    pub fn from_settings(settings: &StripeSettings) -> Self {
        Self::new(
            settings.secret_key.clone(),
            settings.webhook_secret.clone(),
            settings.request_timeout,
        )
    }

    /// Every outbound call is bounded; an elapsed timer is reported like any
    /// other upstream failure.
    async fn bounded<T, F>(&self, call: F) -> Result<T, StripeServiceError>
    where
        F: Future<Output = Result<T, stripe::StripeError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(map_stripe_error),
            Err(_) => Err(StripeServiceError::Timeout(self.timeout)),
        }
    }
}

fn map_stripe_error(err: stripe::StripeError) -> StripeServiceError {
    match err {
        stripe::StripeError::Stripe(ref request) if request.http_status == 404 => {
            StripeServiceError::NotFound(err.to_string())
        }
        stripe::StripeError::Timeout => StripeServiceError::Api("stripe client timeout".into()),
        other => other.into(),
    }
}

fn map_interval(interval: stripe::RecurringInterval) -> BillingInterval {
    match interval {
        stripe::RecurringInterval::Day => BillingInterval::Day,
        stripe::RecurringInterval::Week => BillingInterval::Week,
        stripe::RecurringInterval::Month => BillingInterval::Month,
        stripe::RecurringInterval::Year => BillingInterval::Year,
    }
}

fn positive(ts: i64) -> Option<i64> {
    (ts > 0).then_some(ts)
}

fn map_subscription(sub: stripe::Subscription) -> SubscriptionInfo {
    let first_price = sub.items.data.first().and_then(|item| item.price.as_ref());
    let product_id = first_price
        .and_then(|price| price.product.as_ref())
        .map(|product| product.id().to_string());
    let recurring = first_price
        .and_then(|price| price.recurring.as_ref())
        .map(|recurring| RecurringInfo {
            interval: map_interval(recurring.interval),
            interval_count: u32::try_from(recurring.interval_count).unwrap_or(1).max(1),
        });

    SubscriptionInfo {
        id: sub.id.to_string(),
        customer_id: sub.customer.id().to_string(),
        status: sub.status.to_string(),
        created: sub.created,
        current_period_start: positive(sub.current_period_start),
        current_period_end: positive(sub.current_period_end),
        trial_end: sub.trial_end.and_then(positive),
        product_id,
        recurring,
    }
}

#[async_trait]
impl StripeService for LiveStripeService {
    async fn find_customer_by_email(
        &self,
        email: &str,
    ) -> Result<Option<CustomerInfo>, StripeServiceError> {
        let mut params = stripe::ListCustomers::new();
        params.email = Some(email);
        params.limit = Some(1);

        let customers = self
            .bounded(stripe::Customer::list(&self.client, &params))
            .await?;

        Ok(customers.data.into_iter().next().map(|customer| CustomerInfo {
            id: customer.id.to_string(),
            email: customer.email,
        }))
    }

    async fn retrieve_customer(
        &self,
        customer_id: &str,
    ) -> Result<CustomerInfo, StripeServiceError> {
        let cust_id = customer_id
            .parse::<stripe::CustomerId>()
            .map_err(|e| StripeServiceError::Other(e.to_string()))?;
        let customer = self
            .bounded(stripe::Customer::retrieve(&self.client, &cust_id, &[]))
            .await?;

        if customer.deleted {
            return Err(StripeServiceError::NotFound(format!(
                "customer {customer_id} was deleted"
            )));
        }

        Ok(CustomerInfo {
            id: customer.id.to_string(),
            email: customer.email,
        })
    }

    async fn list_subscriptions(
        &self,
        customer_id: &str,
        status: SubscriptionStatusFilter,
    ) -> Result<Vec<SubscriptionInfo>, StripeServiceError> {
        let cust_id = customer_id
            .parse::<stripe::CustomerId>()
            .map_err(|e| StripeServiceError::Other(e.to_string()))?;

        let mut list_params = stripe::ListSubscriptions::new();
        list_params.customer = Some(cust_id);
        list_params.status = Some(match status {
            SubscriptionStatusFilter::Active => stripe::SubscriptionStatusFilter::Active,
            SubscriptionStatusFilter::Trialing => stripe::SubscriptionStatusFilter::Trialing,
        });
        list_params.limit = Some(100);

        let subs = self
            .bounded(stripe::Subscription::list(&self.client, &list_params))
            .await?;

        Ok(subs.data.into_iter().map(map_subscription).collect())
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<SubscriptionInfo, StripeServiceError> {
        let sub_id = subscription_id
            .parse::<stripe::SubscriptionId>()
            .map_err(|e| StripeServiceError::Other(e.to_string()))?;
        let sub = self
            .bounded(stripe::Subscription::retrieve(&self.client, &sub_id, &[]))
            .await?;
        Ok(map_subscription(sub))
    }

    async fn retrieve_product(&self, product_id: &str) -> Result<ProductInfo, StripeServiceError> {
        let prod_id = product_id
            .parse::<stripe::ProductId>()
            .map_err(|e| StripeServiceError::Other(e.to_string()))?;
        let product = self
            .bounded(stripe::Product::retrieve(&self.client, &prod_id, &[]))
            .await?;

        Ok(ProductInfo {
            id: product.id.to_string(),
            name: product.name,
            metadata: product.metadata.unwrap_or_default().into_iter().collect(),
        })
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<StripeEvent, StripeServiceError> {
        let payload_str =
            std::str::from_utf8(payload).map_err(|e| StripeServiceError::Serde(e.to_string()))?;
        // signature and timestamp tolerance only; the raw body is what gets stored
        stripe::Webhook::construct_event(payload_str, signature_header, &self.webhook_secret)?;
        StripeEvent::from_payload(payload)
    }
}
