use std::sync::Arc;

use serde::Serialize;
use time::{Duration, OffsetDateTime};
use tracing::{error, info, warn};

use crate::billing::error::BillingError;
use crate::config::RetrySettings;
use crate::db::webhook_attempt_repository::WebhookAttemptRepository;
use crate::models::webhook_attempt::WebhookAttempt;
use crate::services::webhook_redelivery::WebhookRedelivery;

/// Exponential backoff over a fixed number of delivery attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: i32,
    pub base_delay_minutes: i64,
    pub multiplier: i64,
    pub batch_size: i64,
    pub claim_timeout: std::time::Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_minutes: 5,
            multiplier: 3,
            batch_size: 50,
            claim_timeout: std::time::Duration::from_secs(600),
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            base_delay_minutes: settings.base_delay_minutes,
            multiplier: settings.backoff_multiplier,
            batch_size: settings.batch_size,
            claim_timeout: settings.claim_timeout,
        }
    }

    /// Delay scheduled after the failure that produced `attempt_number`:
    /// `base × multiplier^(attempt_number − 1)` minutes.
    pub fn backoff_for(&self, attempt_number: i32) -> Duration {
        let exponent = u32::try_from(attempt_number.saturating_sub(1)).unwrap_or(0);
        let factor = self.multiplier.checked_pow(exponent).unwrap_or(i64::MAX);
        Duration::minutes(self.base_delay_minutes.saturating_mul(factor))
    }

    /// When the attempt numbered `attempt_number` should be retried, or `None`
    /// once the attempt budget is spent.
    pub fn next_retry_at(&self, attempt_number: i32, now: OffsetDateTime) -> Option<OffsetDateTime> {
        if attempt_number >= self.max_attempts {
            return None;
        }
        now.checked_add(self.backoff_for(attempt_number))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetryPassSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub exhausted: usize,
}

/// Re-delivers failed webhook events on a backoff schedule.
pub struct WebhookRetryScheduler {
    attempts: Arc<dyn WebhookAttemptRepository>,
    redelivery: Arc<dyn WebhookRedelivery>,
    policy: RetryPolicy,
}

impl WebhookRetryScheduler {
    pub fn new(
        attempts: Arc<dyn WebhookAttemptRepository>,
        redelivery: Arc<dyn WebhookRedelivery>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            attempts,
            redelivery,
            policy,
        }
    }

    /// One pass over due attempts. Safe to run concurrently with itself: the
    /// claim step hands each attempt to exactly one pass.
    pub async fn run_pass(&self, now: OffsetDateTime) -> Result<RetryPassSummary, BillingError> {
        let stale_before = now - self.policy.claim_timeout;
        let released = self.attempts.release_stale_claims(stale_before).await?;
        if released > 0 {
            warn!(released, "released webhook retry claims abandoned by a previous pass");
        }

        let claimed = self
            .attempts
            .claim_due(now, self.policy.max_attempts, self.policy.batch_size)
            .await?;

        let mut summary = RetryPassSummary::default();
        for attempt in claimed {
            summary.processed += 1;
            match self.redelivery.redeliver(&attempt).await {
                Ok(()) => {
                    summary.succeeded += 1;
                    if let Err(err) = self.attempts.mark_success(attempt.id).await {
                        warn!(?err, event_id = %attempt.stripe_event_id, "failed to mark webhook retry as successful");
                    }
                    info!(
                        event_id = %attempt.stripe_event_id,
                        attempt = attempt.attempt_number,
                        "webhook retry succeeded"
                    );
                }
                Err(delivery_err) => {
                    summary.failed += 1;
                    if self.record_failure(&attempt, &delivery_err.to_string(), now).await {
                        summary.exhausted += 1;
                    }
                }
            }
        }

        if summary.processed > 0 {
            info!(
                processed = summary.processed,
                succeeded = summary.succeeded,
                failed = summary.failed,
                exhausted = summary.exhausted,
                "webhook retry pass finished"
            );
        }
        Ok(summary)
    }

    /// Returns true when this failure used up the last attempt.
    async fn record_failure(&self, attempt: &WebhookAttempt, message: &str, now: OffsetDateTime) -> bool {
        let next_attempt = attempt.attempt_number + 1;
        let next_retry_at = self.policy.next_retry_at(next_attempt, now);

        if let Err(err) = self
            .attempts
            .record_retry_failure(attempt.id, next_attempt, next_retry_at, message)
            .await
        {
            warn!(?err, event_id = %attempt.stripe_event_id, "failed to record webhook retry failure");
        }

        match next_retry_at {
            Some(at) => {
                warn!(
                    event_id = %attempt.stripe_event_id,
                    attempt = next_attempt,
                    next_retry_at = %at,
                    error = message,
                    "webhook retry failed"
                );
                false
            }
            None => {
                error!(
                    event_id = %attempt.stripe_event_id,
                    event_type = %attempt.event_type,
                    attempts = next_attempt,
                    error = message,
                    "webhook retries exhausted; manual intervention required"
                );
                true
            }
        }
    }
}
