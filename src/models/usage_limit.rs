use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct UsageLimit {
    pub user_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub period_start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub period_end: OffsetDateTime,
    pub used_count: i32,
    pub limit_count: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl UsageLimit {
    pub fn covers(&self, now: OffsetDateTime) -> bool {
        self.period_start <= now && now < self.period_end
    }

    pub fn has_remaining(&self) -> bool {
        self.used_count < self.limit_count
    }
}

/// Result of a reconciliation write to the usage table.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageLimitSync {
    pub record: UsageLimit,
    pub created: bool,
}
