use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::usage_limit::{UsageLimit, UsageLimitSync};

#[async_trait]
pub trait UsageLimitRepository: Send + Sync {
    async fn find_by_user_id(&self, user_id: Uuid) -> Result<Option<UsageLimit>, sqlx::Error>;

    /// Creates the row with `used_count = 0`, or updates only `limit_count`
    /// and `period_end` on an existing row.
    async fn sync_limit(
        &self,
        user_id: Uuid,
        limit_count: i32,
        period_start: OffsetDateTime,
        period_end: OffsetDateTime,
    ) -> Result<UsageLimitSync, sqlx::Error>;

    /// Lowers or raises the cap of an existing row without creating one.
    async fn set_limit_if_present(
        &self,
        user_id: Uuid,
        limit_count: i32,
    ) -> Result<Option<UsageLimit>, sqlx::Error>;

    /// Single conditional increment. `None` means the row is missing, outside
    /// its period, or already at the cap.
    async fn try_increment(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<Option<UsageLimit>, sqlx::Error>;

    /// Opens a fresh billing period with `used_count = 0`. Only applies when
    /// `period_start` is later than the stored one, so replays are no-ops.
    async fn start_new_period(
        &self,
        user_id: Uuid,
        period_start: OffsetDateTime,
        period_end: OffsetDateTime,
        limit_count: i32,
    ) -> Result<bool, sqlx::Error>;
}
