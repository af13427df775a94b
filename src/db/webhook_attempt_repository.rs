use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::webhook_attempt::{NewWebhookAttempt, WebhookAttempt};

#[async_trait]
pub trait WebhookAttemptRepository: Send + Sync {
    /// Records the first failure for an event. Returns `None` when the event
    /// already has an attempt row.
    async fn record_failure(
        &self,
        attempt: &NewWebhookAttempt,
    ) -> Result<Option<WebhookAttempt>, sqlx::Error>;

    async fn find_by_event_id(
        &self,
        stripe_event_id: &str,
    ) -> Result<Option<WebhookAttempt>, sqlx::Error>;

    /// Moves up to `limit` due attempts from `failed` to `retrying` and returns
    /// them. Rows locked by a concurrent pass are skipped.
    async fn claim_due(
        &self,
        now: OffsetDateTime,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<WebhookAttempt>, sqlx::Error>;

    /// Returns claims older than `claimed_before` to `failed` without
    /// consuming an attempt.
    async fn release_stale_claims(&self, claimed_before: OffsetDateTime)
        -> Result<u64, sqlx::Error>;

    async fn mark_success(&self, id: Uuid) -> Result<bool, sqlx::Error>;

    async fn mark_success_for_event(&self, stripe_event_id: &str) -> Result<bool, sqlx::Error>;

    /// Stores a failed retry. `next_retry_at = None` makes the row terminal.
    async fn record_retry_failure(
        &self,
        id: Uuid,
        attempt_number: i32,
        next_retry_at: Option<OffsetDateTime>,
        error_message: &str,
    ) -> Result<bool, sqlx::Error>;
}
