use std::cmp::Reverse;
use std::collections::HashMap;

use crate::config::{StripeSettings, UsageLimits};
use crate::models::plan::PlanTier;
use crate::services::stripe::{ProductInfo, SubscriptionInfo};

const TIER_METADATA_KEYS: [&str; 2] = ["tier", "plan"];

/// Maps Stripe products to plan tiers and tiers to usage limits.
#[derive(Debug, Clone)]
pub struct TierCatalog {
    products: HashMap<String, PlanTier>,
    limits: UsageLimits,
}

impl TierCatalog {
    pub fn new(products: HashMap<String, PlanTier>, limits: UsageLimits) -> Self {
        Self { products, limits }
    }

    pub fn from_settings(stripe: &StripeSettings, limits: UsageLimits) -> Self {
        let mut products = HashMap::new();
        for id in &stripe.pro_product_ids {
            products.insert(id.clone(), PlanTier::Pro);
        }
        // a product listed under both keeps the higher tier
        for id in &stripe.ultra_pro_product_ids {
            products.insert(id.clone(), PlanTier::UltraPro);
        }
        Self::new(products, limits)
    }

    /// Tier from the configured product map, if the product is listed.
    pub fn configured_tier(&self, product_id: &str) -> Option<PlanTier> {
        self.products.get(product_id).copied()
    }

    /// Tier declared on the product itself: metadata first, then the name.
    pub fn tier_from_product(product: &ProductInfo) -> Option<PlanTier> {
        TIER_METADATA_KEYS
            .iter()
            .filter_map(|key| product.metadata.get(*key))
            .find_map(|label| PlanTier::from_label(label))
            .or_else(|| product.name.as_deref().and_then(PlanTier::from_label))
    }

    pub fn limit_for(&self, tier: PlanTier) -> i32 {
        self.limits.for_tier(tier)
    }
}

/// Picks the subscription with the highest tier. Ties go to the
/// lexicographically smallest subscription id so the result never depends on
/// the order Stripe lists them in.
pub fn select_highest_tier<T>(candidates: T) -> Option<(SubscriptionInfo, PlanTier)>
where
    T: IntoIterator<Item = (SubscriptionInfo, PlanTier)>,
{
    candidates
        .into_iter()
        .max_by(|(a, tier_a), (b, tier_b)| {
            (tier_a, Reverse(&a.id)).cmp(&(tier_b, Reverse(&b.id)))
        })
}
