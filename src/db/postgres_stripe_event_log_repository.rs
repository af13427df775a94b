use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;

use crate::db::stripe_event_log_repository::{EventClaim, StripeEventLogRepository};

pub struct PostgresStripeEventLogRepository {
    pub pool: PgPool,
}

#[async_trait]
impl StripeEventLogRepository for PostgresStripeEventLogRepository {
    async fn claim_event(
        &self,
        event_id: &str,
        event_type: &str,
        stale_after: Duration,
    ) -> Result<EventClaim, sqlx::Error> {
        let claimed = sqlx::query_scalar::<_, String>(
            r#"
            INSERT INTO stripe_event_log (event_id, event_type, status, processing_started_at)
            VALUES ($1, $2, 'processing', now())
            ON CONFLICT (event_id) DO UPDATE
            SET status = 'processing',
                processing_started_at = now(),
                processed_at = NULL
            WHERE stripe_event_log.status = 'failed'
               OR (stripe_event_log.status = 'processing'
                   AND stripe_event_log.processing_started_at < now() - make_interval(secs => $3))
            RETURNING event_id
            "#,
        )
        .bind(event_id)
        .bind(event_type)
        .bind(stale_after.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        if claimed.is_some() {
            return Ok(EventClaim::Claimed);
        }

        let status = sqlx::query_scalar::<_, String>(
            "SELECT status FROM stripe_event_log WHERE event_id = $1",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match status.as_deref() {
            Some("succeeded") => EventClaim::AlreadySucceeded,
            _ => EventClaim::InProgress,
        })
    }

    async fn mark_succeeded(&self, event_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE stripe_event_log
            SET status = 'succeeded',
                processed_at = now(),
                error_message = NULL
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed(&self, event_id: &str, error_message: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE stripe_event_log
            SET status = 'failed',
                processed_at = now(),
                error_message = $2
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
