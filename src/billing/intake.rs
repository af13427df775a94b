use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::billing::error::BillingError;
use crate::billing::events::{parse_event, BillingEvent, ParsedEvent};
use crate::billing::reconcile::ReconciliationService;
use crate::billing::retry::RetryPolicy;
use crate::db::entitlement_repository::EntitlementRepository;
use crate::db::stripe_event_log_repository::{EventClaim, StripeEventLogRepository};
use crate::db::usage_limit_repository::UsageLimitRepository;
use crate::db::user_repository::UserRepository;
use crate::db::webhook_attempt_repository::WebhookAttemptRepository;
use crate::models::plan::PlanTier;
use crate::models::webhook_attempt::NewWebhookAttempt;
use crate::services::stripe::{StripeService, StripeServiceError};
use crate::utils::epoch::from_unix;

/// A processing claim older than this is assumed to belong to a crashed worker.
const EVENT_CLAIM_STALE_AFTER: Duration = Duration::from_secs(30 * 60);

const CYCLE_BILLING_REASON: &str = "subscription_cycle";

/// How an event reached the intake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Straight from Stripe (or a relay in front of it).
    Live,
    /// Re-sent by the retry scheduler. Failures are reported back to the
    /// scheduler instead of creating a new attempt row.
    Retry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IntakeOutcome {
    Applied {
        user_id: Uuid,
        /// `None` when a newer event had already written the entitlement.
        plan_tier: Option<PlanTier>,
        usage_period_reset: bool,
    },
    Duplicate,
    Ignored,
    /// No local user matches the event; nothing to reconcile.
    Unresolved,
    RetryScheduled {
        error: String,
    },
}

pub struct WebhookIntake {
    users: Arc<dyn UserRepository>,
    entitlements: Arc<dyn EntitlementRepository>,
    usage: Arc<dyn UsageLimitRepository>,
    event_log: Arc<dyn StripeEventLogRepository>,
    attempts: Arc<dyn WebhookAttemptRepository>,
    stripe: Arc<dyn StripeService>,
    reconciler: Arc<ReconciliationService>,
    retry_policy: RetryPolicy,
}

impl WebhookIntake {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        users: Arc<dyn UserRepository>,
        entitlements: Arc<dyn EntitlementRepository>,
        usage: Arc<dyn UsageLimitRepository>,
        event_log: Arc<dyn StripeEventLogRepository>,
        attempts: Arc<dyn WebhookAttemptRepository>,
        stripe: Arc<dyn StripeService>,
        reconciler: Arc<ReconciliationService>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            users,
            entitlements,
            usage,
            event_log,
            attempts,
            stripe,
            reconciler,
            retry_policy,
        }
    }

    /// Processes one delivery. Each event id is applied at most once; a
    /// replay of an event that already succeeded is a no-op.
    pub async fn handle(&self, raw: Value, delivery: Delivery) -> Result<IntakeOutcome, BillingError> {
        let parsed = parse_event(raw)?;

        if let BillingEvent::Ignored { event_type } = &parsed.event {
            debug!(event_id = %parsed.id, %event_type, "ignoring unhandled billing event");
            return Ok(IntakeOutcome::Ignored);
        }

        match self
            .event_log
            .claim_event(&parsed.id, &parsed.event_type, EVENT_CLAIM_STALE_AFTER)
            .await?
        {
            EventClaim::Claimed => {}
            EventClaim::AlreadySucceeded => {
                info!(event_id = %parsed.id, "billing event already processed");
                // a retry of an event that succeeded through another path
                self.attempts.mark_success_for_event(&parsed.id).await?;
                return Ok(IntakeOutcome::Duplicate);
            }
            EventClaim::InProgress => return Err(BillingError::EventInProgress(parsed.id)),
        }

        match self.apply(&parsed).await {
            Ok(outcome) => {
                self.event_log.mark_succeeded(&parsed.id).await?;
                if self.attempts.mark_success_for_event(&parsed.id).await? {
                    info!(event_id = %parsed.id, "pending webhook retry resolved");
                }
                Ok(outcome)
            }
            Err(err) => {
                let message = err.to_string();
                if let Err(log_err) = self.event_log.mark_failed(&parsed.id, &message).await {
                    warn!(?log_err, event_id = %parsed.id, "failed to mark billing event as failed");
                }
                match delivery {
                    Delivery::Live => self.schedule_retry(&parsed, message).await,
                    Delivery::Retry => Err(err),
                }
            }
        }
    }

    async fn schedule_retry(
        &self,
        parsed: &ParsedEvent,
        message: String,
    ) -> Result<IntakeOutcome, BillingError> {
        let now = OffsetDateTime::now_utc();
        let attempt = NewWebhookAttempt {
            stripe_event_id: parsed.id.clone(),
            event_type: parsed.event_type.clone(),
            request_payload: parsed.payload.clone(),
            error_message: message.clone(),
            next_retry_at: self.retry_policy.next_retry_at(1, now),
        };

        match self.attempts.record_failure(&attempt).await? {
            Some(recorded) => error!(
                event_id = %parsed.id,
                event_type = %parsed.event_type,
                next_retry_at = ?recorded.next_retry_at,
                error = %message,
                "billing event failed; retry scheduled"
            ),
            None => warn!(
                event_id = %parsed.id,
                error = %message,
                "billing event failed again; retry already tracked"
            ),
        }

        Ok(IntakeOutcome::RetryScheduled { error: message })
    }

    async fn apply(&self, parsed: &ParsedEvent) -> Result<IntakeOutcome, BillingError> {
        let Some(user_id) = self.resolve_user(&parsed.event).await? else {
            warn!(
                event_id = %parsed.id,
                event_type = %parsed.event_type,
                customer_id = ?parsed.event.customer_id(),
                "no local user for billing event"
            );
            return Ok(IntakeOutcome::Unresolved);
        };

        let version = if parsed.created > 0 {
            parsed.created
        } else {
            OffsetDateTime::now_utc().unix_timestamp()
        };

        let plan_tier = self
            .reconciler
            .reconcile_from_event(
                user_id,
                parsed.event.customer_id(),
                parsed.event.customer_email(),
                version,
            )
            .await?;

        let usage_period_reset = self.roll_usage_period(user_id, &parsed.event).await?;

        info!(
            event_id = %parsed.id,
            event_type = %parsed.event_type,
            %user_id,
            plan_tier = ?plan_tier,
            usage_period_reset,
            "billing event applied"
        );

        Ok(IntakeOutcome::Applied {
            user_id,
            plan_tier,
            usage_period_reset,
        })
    }

    /// Starts a fresh usage period when a renewal invoice is paid. The write
    /// only lands for a period that starts after the stored one, so a replayed
    /// renewal cannot reset the counter twice.
    async fn roll_usage_period(&self, user_id: Uuid, event: &BillingEvent) -> Result<bool, BillingError> {
        let BillingEvent::InvoicePaid {
            billing_reason: Some(reason),
            period_start: Some(start),
            period_end: Some(end),
            ..
        } = event
        else {
            return Ok(false);
        };
        if reason != CYCLE_BILLING_REASON {
            return Ok(false);
        }
        let (Some(start), Some(end)) = (from_unix(*start), from_unix(*end)) else {
            return Ok(false);
        };

        let Some(entitlement) = self.entitlements.find_by_user_id(user_id).await? else {
            return Ok(false);
        };
        if !entitlement.is_paid_and_active() {
            return Ok(false);
        }

        let limit = self.reconciler.catalog().limit_for(entitlement.plan_tier);
        let reset = self.usage.start_new_period(user_id, start, end, limit).await?;
        if reset {
            info!(%user_id, limit, period_end = %end, "usage period renewed");
        }
        Ok(reset)
    }

    /// Local user for an event: the checkout's client reference first, then
    /// the stored customer link, then the customer's email.
    async fn resolve_user(&self, event: &BillingEvent) -> Result<Option<Uuid>, BillingError> {
        if let Some(user_id) = event
            .client_reference_id()
            .and_then(|id| Uuid::parse_str(id).ok())
        {
            if self.users.find_profile_by_id(user_id).await?.is_some() {
                return Ok(Some(user_id));
            }
            warn!(%user_id, "checkout client reference does not match a profile");
        }

        if let Some(customer_id) = event.customer_id() {
            if let Some(user_id) = self
                .entitlements
                .find_user_id_by_customer_id(customer_id)
                .await?
            {
                return Ok(Some(user_id));
            }
        }

        let email = match (event.customer_email(), event.customer_id()) {
            (Some(email), _) => Some(email.to_string()),
            (None, Some(customer_id)) => match self.stripe.retrieve_customer(customer_id).await {
                Ok(customer) => customer.email,
                Err(StripeServiceError::NotFound(_)) => None,
                Err(err) => return Err(err.into()),
            },
            (None, None) => None,
        };

        match email {
            Some(email) => Ok(self
                .users
                .find_profile_by_email(&email)
                .await?
                .map(|profile| profile.id)),
            None => Ok(None),
        }
    }
}
