use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::usage_limit_repository::UsageLimitRepository;
use crate::models::usage_limit::{UsageLimit, UsageLimitSync};

pub struct PostgresUsageLimitRepository {
    pub pool: PgPool,
}

#[derive(FromRow)]
struct SyncedRow {
    #[sqlx(flatten)]
    record: UsageLimit,
    created: bool,
}

#[async_trait]
impl UsageLimitRepository for PostgresUsageLimitRepository {
    async fn find_by_user_id(&self, user_id: Uuid) -> Result<Option<UsageLimit>, sqlx::Error> {
        sqlx::query_as::<_, UsageLimit>(
            r#"
            SELECT user_id, period_start, period_end, used_count, limit_count, updated_at
            FROM usage_limits
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn sync_limit(
        &self,
        user_id: Uuid,
        limit_count: i32,
        period_start: OffsetDateTime,
        period_end: OffsetDateTime,
    ) -> Result<UsageLimitSync, sqlx::Error> {
        // xmax is zero only for a freshly inserted tuple
        let row = sqlx::query_as::<_, SyncedRow>(
            r#"
            INSERT INTO usage_limits (user_id, period_start, period_end, used_count, limit_count, updated_at)
            VALUES ($1, $2, $3, 0, $4, now())
            ON CONFLICT (user_id) DO UPDATE
            SET limit_count = EXCLUDED.limit_count,
                period_end = EXCLUDED.period_end,
                updated_at = now()
            RETURNING user_id, period_start, period_end, used_count, limit_count, updated_at,
                      (xmax = 0) AS created
            "#,
        )
        .bind(user_id)
        .bind(period_start)
        .bind(period_end)
        .bind(limit_count)
        .fetch_one(&self.pool)
        .await?;

        Ok(UsageLimitSync {
            record: row.record,
            created: row.created,
        })
    }

    async fn set_limit_if_present(
        &self,
        user_id: Uuid,
        limit_count: i32,
    ) -> Result<Option<UsageLimit>, sqlx::Error> {
        sqlx::query_as::<_, UsageLimit>(
            r#"
            UPDATE usage_limits
            SET limit_count = $2,
                updated_at = now()
            WHERE user_id = $1
            RETURNING user_id, period_start, period_end, used_count, limit_count, updated_at
            "#,
        )
        .bind(user_id)
        .bind(limit_count)
        .fetch_optional(&self.pool)
        .await
    }

    async fn try_increment(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<Option<UsageLimit>, sqlx::Error> {
        sqlx::query_as::<_, UsageLimit>(
            r#"
            UPDATE usage_limits
            SET used_count = used_count + 1,
                updated_at = now()
            WHERE user_id = $1
              AND used_count < limit_count
              AND period_start <= $2
              AND period_end > $2
            RETURNING user_id, period_start, period_end, used_count, limit_count, updated_at
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
    }

    async fn start_new_period(
        &self,
        user_id: Uuid,
        period_start: OffsetDateTime,
        period_end: OffsetDateTime,
        limit_count: i32,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO usage_limits (user_id, period_start, period_end, used_count, limit_count, updated_at)
            VALUES ($1, $2, $3, 0, $4, now())
            ON CONFLICT (user_id) DO UPDATE
            SET period_start = EXCLUDED.period_start,
                period_end = EXCLUDED.period_end,
                used_count = 0,
                limit_count = EXCLUDED.limit_count,
                updated_at = now()
            WHERE usage_limits.period_start < EXCLUDED.period_start
            "#,
        )
        .bind(user_id)
        .bind(period_start)
        .bind(period_end)
        .bind(limit_count)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
