use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::plan::PlanTier;

pub const ENTITLEMENT_STATUS_INACTIVE: &str = "inactive";

/// Local cache of what Stripe says a user is paying for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entitlement {
    pub user_id: Uuid,
    pub plan_tier: PlanTier,
    pub plan_name: Option<String>,
    pub status: String,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub stripe_product_id: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub current_period_end: Option<OffsetDateTime>,
    pub source_version: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Entitlement {
    /// A paid tier in an active-like state. Period end is not checked here;
    /// the usage window carries the period that gates generation.
    pub fn is_paid_and_active(&self) -> bool {
        self.plan_tier.is_paid() && matches!(self.status.as_str(), "active" | "trialing")
    }
}

/// Values written by a reconciliation or webhook pass.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitlementUpsert {
    pub user_id: Uuid,
    pub plan_tier: PlanTier,
    pub plan_name: Option<String>,
    pub status: String,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub stripe_product_id: Option<String>,
    pub current_period_end: Option<OffsetDateTime>,
    pub source_version: i64,
}

impl EntitlementUpsert {
    /// Entitlement for a user with no qualifying subscription.
    pub fn free(user_id: Uuid, stripe_customer_id: Option<String>, source_version: i64) -> Self {
        Self {
            user_id,
            plan_tier: PlanTier::Free,
            plan_name: Some(PlanTier::Free.display_name().to_string()),
            status: ENTITLEMENT_STATUS_INACTIVE.to_string(),
            stripe_customer_id,
            stripe_subscription_id: None,
            stripe_product_id: None,
            current_period_end: None,
            source_version,
        }
    }

    pub fn into_entitlement(self, updated_at: OffsetDateTime) -> Entitlement {
        Entitlement {
            user_id: self.user_id,
            plan_tier: self.plan_tier,
            plan_name: self.plan_name,
            status: self.status,
            stripe_customer_id: self.stripe_customer_id,
            stripe_subscription_id: self.stripe_subscription_id,
            stripe_product_id: self.stripe_product_id,
            current_period_end: self.current_period_end,
            source_version: self.source_version,
            updated_at,
        }
    }
}
