use async_trait::async_trait;
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::webhook_attempt_repository::WebhookAttemptRepository;
use crate::models::webhook_attempt::{NewWebhookAttempt, WebhookAttempt, WebhookAttemptStatus};

pub struct PostgresWebhookAttemptRepository {
    pub pool: PgPool,
}

const ATTEMPT_COLUMNS: &str = "id, stripe_event_id, event_type, request_payload, status, \
     attempt_number, next_retry_at, error_message, claimed_at, created_at, updated_at";

#[derive(FromRow)]
struct WebhookAttemptRow {
    id: Uuid,
    stripe_event_id: String,
    event_type: String,
    request_payload: Value,
    status: String,
    attempt_number: i32,
    next_retry_at: Option<OffsetDateTime>,
    error_message: Option<String>,
    claimed_at: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<WebhookAttemptRow> for WebhookAttempt {
    type Error = sqlx::Error;

    fn try_from(row: WebhookAttemptRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<WebhookAttemptStatus>()
            .map_err(|err| sqlx::Error::Decode(err.into()))?;

        Ok(WebhookAttempt {
            id: row.id,
            stripe_event_id: row.stripe_event_id,
            event_type: row.event_type,
            request_payload: row.request_payload,
            status,
            attempt_number: row.attempt_number,
            next_retry_at: row.next_retry_at,
            error_message: row.error_message,
            claimed_at: row.claimed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_attempts(rows: Vec<WebhookAttemptRow>) -> Result<Vec<WebhookAttempt>, sqlx::Error> {
    rows.into_iter().map(WebhookAttempt::try_from).collect()
}

#[async_trait]
impl WebhookAttemptRepository for PostgresWebhookAttemptRepository {
    async fn record_failure(
        &self,
        attempt: &NewWebhookAttempt,
    ) -> Result<Option<WebhookAttempt>, sqlx::Error> {
        let sql = format!(
            r#"
            INSERT INTO webhook_attempts (
                stripe_event_id, event_type, request_payload, status,
                attempt_number, next_retry_at, error_message
            )
            VALUES ($1, $2, $3, 'failed', 1, $4, $5)
            ON CONFLICT (stripe_event_id) DO NOTHING
            RETURNING {ATTEMPT_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, WebhookAttemptRow>(&sql)
            .bind(&attempt.stripe_event_id)
            .bind(&attempt.event_type)
            .bind(&attempt.request_payload)
            .bind(attempt.next_retry_at)
            .bind(&attempt.error_message)
            .fetch_optional(&self.pool)
            .await?;

        row.map(WebhookAttempt::try_from).transpose()
    }

    async fn find_by_event_id(
        &self,
        stripe_event_id: &str,
    ) -> Result<Option<WebhookAttempt>, sqlx::Error> {
        let sql = format!("SELECT {ATTEMPT_COLUMNS} FROM webhook_attempts WHERE stripe_event_id = $1");
        let row = sqlx::query_as::<_, WebhookAttemptRow>(&sql)
            .bind(stripe_event_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(WebhookAttempt::try_from).transpose()
    }

    async fn claim_due(
        &self,
        now: OffsetDateTime,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<WebhookAttempt>, sqlx::Error> {
        let rows = sqlx::query_as::<_, WebhookAttemptRow>(
            r#"
            WITH due AS (
                SELECT id
                FROM webhook_attempts
                WHERE status = 'failed'
                  AND next_retry_at IS NOT NULL
                  AND next_retry_at <= $1
                  AND attempt_number < $2
                ORDER BY next_retry_at
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            UPDATE webhook_attempts AS wa
            SET status = 'retrying',
                claimed_at = $1,
                updated_at = now()
            FROM due
            WHERE wa.id = due.id
            RETURNING wa.*
            "#,
        )
        .bind(now)
        .bind(max_attempts)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        into_attempts(rows)
    }

    async fn release_stale_claims(
        &self,
        claimed_before: OffsetDateTime,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_attempts
            SET status = 'failed',
                claimed_at = NULL,
                next_retry_at = COALESCE(next_retry_at, now()),
                updated_at = now()
            WHERE status = 'retrying'
              AND claimed_at < $1
            "#,
        )
        .bind(claimed_before)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn mark_success(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_attempts
            SET status = 'success',
                next_retry_at = NULL,
                claimed_at = NULL,
                error_message = NULL,
                updated_at = now()
            WHERE id = $1 AND status <> 'success'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_success_for_event(&self, stripe_event_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_attempts
            SET status = 'success',
                next_retry_at = NULL,
                claimed_at = NULL,
                error_message = NULL,
                updated_at = now()
            WHERE stripe_event_id = $1 AND status <> 'success'
            "#,
        )
        .bind(stripe_event_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_retry_failure(
        &self,
        id: Uuid,
        attempt_number: i32,
        next_retry_at: Option<OffsetDateTime>,
        error_message: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_attempts
            SET status = 'failed',
                attempt_number = $2,
                next_retry_at = $3,
                error_message = $4,
                claimed_at = NULL,
                updated_at = now()
            WHERE id = $1
              AND status = 'retrying'
              AND attempt_number < $2
            "#,
        )
        .bind(id)
        .bind(attempt_number)
        .bind(next_retry_at)
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
