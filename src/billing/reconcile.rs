use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::billing::error::BillingError;
use crate::billing::period::compute_period_end;
use crate::billing::tiers::{select_highest_tier, TierCatalog};
use crate::db::entitlement_repository::EntitlementRepository;
use crate::db::usage_limit_repository::UsageLimitRepository;
use crate::db::user_repository::UserRepository;
use crate::models::entitlement::EntitlementUpsert;
use crate::models::plan::PlanTier;
use crate::models::user::Profile;
use crate::services::stripe::{
    StripeService, StripeServiceError, SubscriptionInfo, SubscriptionStatusFilter,
};
use crate::utils::epoch::from_unix;

const ACTIVE_OR_TRIALING: &[SubscriptionStatusFilter] = &[
    SubscriptionStatusFilter::Active,
    SubscriptionStatusFilter::Trialing,
];

/// Result of the on-demand entitlement check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionCheck {
    pub subscribed: bool,
    pub product_id: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub subscription_end: Option<OffsetDateTime>,
    pub plan_tier: PlanTier,
}

impl SubscriptionCheck {
    fn unsubscribed() -> Self {
        Self {
            subscribed: false,
            product_id: None,
            subscription_end: None,
            plan_tier: PlanTier::Free,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub synced: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestoreOutcome {
    pub restored: bool,
    pub plan: PlanTier,
    pub plan_name: Option<String>,
    pub image_limit: i32,
    #[serde(with = "time::serde::rfc3339::option")]
    pub period_end: Option<OffsetDateTime>,
}

/// The subscription chosen to represent a customer, with everything needed to
/// write the entitlement and usage rows.
#[derive(Debug, Clone)]
struct ResolvedPlan {
    subscription: SubscriptionInfo,
    tier: PlanTier,
    plan_name: String,
    period_start: Option<OffsetDateTime>,
    period_end: Option<OffsetDateTime>,
}

/// Overwrites local entitlement and usage state from Stripe.
pub struct ReconciliationService {
    users: Arc<dyn UserRepository>,
    entitlements: Arc<dyn EntitlementRepository>,
    usage: Arc<dyn UsageLimitRepository>,
    stripe: Arc<dyn StripeService>,
    catalog: TierCatalog,
    stripe_test_mode: bool,
    sync_concurrency: usize,
}

impl ReconciliationService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        entitlements: Arc<dyn EntitlementRepository>,
        usage: Arc<dyn UsageLimitRepository>,
        stripe: Arc<dyn StripeService>,
        catalog: TierCatalog,
        stripe_test_mode: bool,
        sync_concurrency: usize,
    ) -> Self {
        Self {
            users,
            entitlements,
            usage,
            stripe,
            catalog,
            stripe_test_mode,
            sync_concurrency: sync_concurrency.max(1),
        }
    }

    pub fn catalog(&self) -> &TierCatalog {
        &self.catalog
    }

    /// On-demand check for the signed-in user. Active and trialing
    /// subscriptions count; the usage table is left alone.
    pub async fn check_subscription(
        &self,
        user_id: Uuid,
        email: &str,
    ) -> Result<SubscriptionCheck, BillingError> {
        let version = observation_version();

        let Some(customer) = self.stripe.find_customer_by_email(email).await? else {
            info!(%user_id, "no stripe customer for user; resetting entitlement");
            self.write_entitlement(EntitlementUpsert::free(user_id, None, version))
                .await?;
            return Ok(SubscriptionCheck::unsubscribed());
        };

        let Some(plan) = self.resolve_plan(&customer.id, ACTIVE_OR_TRIALING).await? else {
            info!(%user_id, customer_id = %customer.id, "no active or trialing subscription; resetting entitlement");
            self.write_entitlement(EntitlementUpsert::free(
                user_id,
                Some(customer.id.clone()),
                version,
            ))
            .await?;
            return Ok(SubscriptionCheck::unsubscribed());
        };

        self.write_entitlement(paid_upsert(user_id, &customer.id, &plan, version))
            .await?;

        info!(
            %user_id,
            subscription_id = %plan.subscription.id,
            plan_tier = %plan.tier,
            "entitlement refreshed from stripe"
        );

        Ok(SubscriptionCheck {
            subscribed: true,
            product_id: plan.subscription.product_id.clone(),
            subscription_end: plan.period_end,
            plan_tier: plan.tier,
        })
    }

    /// Bulk pass over every profile with an email. Per-user failures are
    /// logged and counted; they never stop the batch.
    pub async fn sync_all(&self) -> Result<SyncSummary, BillingError> {
        if self.stripe_test_mode {
            return Err(BillingError::Config(
                "refusing to sync subscriptions with a Stripe test-mode key".into(),
            ));
        }

        let profiles = self.users.list_profiles_with_email().await?;
        let total = profiles.len();
        info!(total, concurrency = self.sync_concurrency, "starting subscription sync");

        let summary = stream::iter(profiles)
            .map(|profile| async move {
                let result = self.sync_user(&profile).await;
                (profile.id, result)
            })
            .buffer_unordered(self.sync_concurrency)
            .fold(SyncSummary::default(), |mut summary, (user_id, result)| async move {
                match result {
                    Ok(()) => summary.synced += 1,
                    Err(err) => {
                        warn!(?err, %user_id, "subscription sync failed for user");
                        summary.errors += 1;
                    }
                }
                summary
            })
            .await;

        info!(synced = summary.synced, errors = summary.errors, total, "subscription sync finished");
        Ok(summary)
    }

    /// Reconciles one profile, including its usage row.
    pub async fn sync_user(&self, profile: &Profile) -> Result<(), BillingError> {
        let Some(email) = profile.email.as_deref() else {
            return Ok(());
        };
        let version = observation_version();

        let customer = self.stripe.find_customer_by_email(email).await?;
        let customer_id = customer.map(|c| c.id);
        let plan = match customer_id.as_deref() {
            Some(customer_id) => self.resolve_plan(customer_id, ACTIVE_OR_TRIALING).await?,
            None => None,
        };

        self.apply(profile.id, customer_id.as_deref(), plan.as_ref(), version)
            .await
            .map(|_| ())
    }

    /// Recovery path for a user who paid but whose entitlement never landed.
    /// Trialing subscriptions count. Nothing is written when no subscription
    /// is found.
    pub async fn restore(
        &self,
        user_id: Uuid,
        email: &str,
    ) -> Result<RestoreOutcome, BillingError> {
        let version = observation_version();
        let not_restored = RestoreOutcome {
            restored: false,
            plan: PlanTier::Free,
            plan_name: None,
            image_limit: self.catalog.limit_for(PlanTier::Free),
            period_end: None,
        };

        let Some(customer) = self.stripe.find_customer_by_email(email).await? else {
            info!(%user_id, "restore: no stripe customer found");
            return Ok(not_restored);
        };

        let Some(plan) = self.resolve_plan(&customer.id, ACTIVE_OR_TRIALING).await? else {
            info!(%user_id, customer_id = %customer.id, "restore: no active or trialing subscription");
            return Ok(not_restored);
        };

        self.apply(user_id, Some(&customer.id), Some(&plan), version)
            .await?;

        info!(%user_id, plan_tier = %plan.tier, "subscription restored");
        Ok(RestoreOutcome {
            restored: true,
            plan: plan.tier,
            plan_name: Some(plan.plan_name.clone()),
            image_limit: self.catalog.limit_for(plan.tier),
            period_end: plan.period_end,
        })
    }

    /// Event-driven reconciliation. `version` is the event's creation time so
    /// an older event can never overwrite state written by a newer one.
    /// Returns the tier that was written, or `None` if the write was stale.
    pub async fn reconcile_from_event(
        &self,
        user_id: Uuid,
        customer_id: Option<&str>,
        email: Option<&str>,
        version: i64,
    ) -> Result<Option<PlanTier>, BillingError> {
        let customer_id = match (customer_id, email) {
            (Some(id), _) => Some(id.to_string()),
            (None, Some(email)) => self
                .stripe
                .find_customer_by_email(email)
                .await?
                .map(|c| c.id),
            (None, None) => None,
        };

        let plan = match customer_id.as_deref() {
            Some(customer_id) => self.resolve_plan(customer_id, ACTIVE_OR_TRIALING).await?,
            None => None,
        };

        let applied = self
            .apply(user_id, customer_id.as_deref(), plan.as_ref(), version)
            .await?;
        Ok(applied.then(|| plan.map(|p| p.tier).unwrap_or(PlanTier::Free)))
    }

    /// Writes the entitlement and, when it was not stale, the usage row.
    async fn apply(
        &self,
        user_id: Uuid,
        customer_id: Option<&str>,
        plan: Option<&ResolvedPlan>,
        version: i64,
    ) -> Result<bool, BillingError> {
        let write = match (plan, customer_id) {
            (Some(plan), Some(customer_id)) => paid_upsert(user_id, customer_id, plan, version),
            _ => EntitlementUpsert::free(user_id, customer_id.map(str::to_string), version),
        };

        if !self.write_entitlement(write).await? {
            return Ok(false);
        }

        self.apply_usage(user_id, plan).await?;
        Ok(true)
    }

    async fn write_entitlement(&self, write: EntitlementUpsert) -> Result<bool, BillingError> {
        let user_id = write.user_id;
        let applied = self.entitlements.upsert(&write).await?;
        if !applied {
            debug!(%user_id, version = write.source_version, "skipped stale entitlement write");
        }
        Ok(applied)
    }

    /// Creates the usage row for a newly paying user or adjusts the cap of an
    /// existing one. `used_count` of an existing row is never touched here.
    async fn apply_usage(
        &self,
        user_id: Uuid,
        plan: Option<&ResolvedPlan>,
    ) -> Result<(), BillingError> {
        match plan {
            Some(plan) => {
                let limit = self.catalog.limit_for(plan.tier);
                let Some(period_end) = plan.period_end else {
                    warn!(
                        %user_id,
                        subscription_id = %plan.subscription.id,
                        "no period end could be determined; usage row left unchanged"
                    );
                    return Ok(());
                };
                let period_start = plan
                    .period_start
                    .unwrap_or_else(OffsetDateTime::now_utc)
                    .min(period_end);
                let synced = self
                    .usage
                    .sync_limit(user_id, limit, period_start, period_end)
                    .await?;
                if synced.created {
                    info!(%user_id, limit, "usage period initialised");
                }
            }
            None => {
                let free_limit = self.catalog.limit_for(PlanTier::Free);
                self.usage.set_limit_if_present(user_id, free_limit).await?;
            }
        }
        Ok(())
    }

    async fn resolve_plan(
        &self,
        customer_id: &str,
        statuses: &[SubscriptionStatusFilter],
    ) -> Result<Option<ResolvedPlan>, BillingError> {
        let mut candidates = Vec::new();
        let mut names = HashMap::new();
        for status in statuses {
            for subscription in self.stripe.list_subscriptions(customer_id, *status).await? {
                match self.tier_for(&subscription).await? {
                    Some((tier, name)) if tier.is_paid() => {
                        names.insert(subscription.id.clone(), name);
                        candidates.push((subscription, tier));
                    }
                    _ => warn!(
                        customer_id,
                        subscription_id = %subscription.id,
                        product_id = ?subscription.product_id,
                        "subscription product does not map to a paid tier"
                    ),
                }
            }
        }

        let Some((subscription, tier)) = select_highest_tier(candidates) else {
            return Ok(None);
        };
        let plan_name = names
            .remove(&subscription.id)
            .unwrap_or_else(|| tier.display_name().to_string());

        let period_end = self.period_end_for(&subscription).await?;
        let period_start = subscription.current_period_start.and_then(from_unix);

        Ok(Some(ResolvedPlan {
            subscription,
            tier,
            plan_name,
            period_start,
            period_end,
        }))
    }

    /// Tier and display name for a subscription's product. Configured
    /// products win; otherwise the product's own metadata is consulted.
    async fn tier_for(
        &self,
        subscription: &SubscriptionInfo,
    ) -> Result<Option<(PlanTier, String)>, BillingError> {
        let Some(product_id) = subscription.product_id.as_deref() else {
            return Ok(None);
        };

        if let Some(tier) = self.catalog.configured_tier(product_id) {
            return Ok(Some((tier, tier.display_name().to_string())));
        }

        match self.stripe.retrieve_product(product_id).await {
            Ok(product) => Ok(TierCatalog::tier_from_product(&product).map(|tier| {
                let name = product
                    .name
                    .clone()
                    .unwrap_or_else(|| tier.display_name().to_string());
                (tier, name)
            })),
            Err(StripeServiceError::NotFound(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Trial end for trialing subscriptions, then the listed period end, then
    /// a re-fetch of the full subscription, then `created + interval`.
    async fn period_end_for(
        &self,
        subscription: &SubscriptionInfo,
    ) -> Result<Option<OffsetDateTime>, BillingError> {
        if subscription.is_trialing() {
            if let Some(end) = subscription.trial_end.and_then(from_unix) {
                return Ok(Some(end));
            }
        }
        if let Some(end) = subscription.current_period_end.and_then(from_unix) {
            return Ok(Some(end));
        }

        let full = self.stripe.retrieve_subscription(&subscription.id).await?;
        if let Some(end) = full.current_period_end.and_then(from_unix) {
            debug!(subscription_id = %subscription.id, "period end taken from full subscription");
            return Ok(Some(end));
        }

        let computed = full
            .recurring
            .or(subscription.recurring)
            .and_then(|recurring| compute_period_end(subscription.created, recurring));
        if computed.is_some() {
            debug!(subscription_id = %subscription.id, "period end computed from billing interval");
        }
        Ok(computed)
    }
}

fn paid_upsert(
    user_id: Uuid,
    customer_id: &str,
    plan: &ResolvedPlan,
    version: i64,
) -> EntitlementUpsert {
    EntitlementUpsert {
        user_id,
        plan_tier: plan.tier,
        plan_name: Some(plan.plan_name.clone()),
        status: plan.subscription.status.clone(),
        stripe_customer_id: Some(customer_id.to_string()),
        stripe_subscription_id: Some(plan.subscription.id.clone()),
        stripe_product_id: plan.subscription.product_id.clone(),
        current_period_end: plan.period_end,
        source_version: version,
    }
}

/// Reconciliation passes are versioned by when they observed Stripe.
fn observation_version() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}
