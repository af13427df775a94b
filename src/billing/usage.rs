use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::billing::error::BillingError;
use crate::db::entitlement_repository::EntitlementRepository;
use crate::db::usage_limit_repository::UsageLimitRepository;
use crate::models::usage_limit::UsageLimit;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    Allowed {
        used: i32,
        limit: i32,
        #[serde(with = "time::serde::rfc3339")]
        period_end: OffsetDateTime,
    },
    NotSubscribed,
    NoUsagePeriod,
    LimitReached {
        used: i32,
        limit: i32,
    },
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allowed { .. })
    }

    fn from_row(row: &UsageLimit) -> Self {
        GateDecision::Allowed {
            used: row.used_count,
            limit: row.limit_count,
            period_end: row.period_end,
        }
    }
}

/// Consumer-side guard around metered generation.
pub struct UsageGate {
    entitlements: Arc<dyn EntitlementRepository>,
    usage: Arc<dyn UsageLimitRepository>,
}

impl UsageGate {
    pub fn new(
        entitlements: Arc<dyn EntitlementRepository>,
        usage: Arc<dyn UsageLimitRepository>,
    ) -> Self {
        Self {
            entitlements,
            usage,
        }
    }

    /// Whether a generation may start. Reads only; the counter is untouched.
    pub async fn check(&self, user_id: Uuid, now: OffsetDateTime) -> Result<GateDecision, BillingError> {
        if !self.is_subscribed(user_id).await? {
            return Ok(GateDecision::NotSubscribed);
        }

        let row = self.usage.find_by_user_id(user_id).await?;
        Ok(match row {
            Some(row) if !row.covers(now) => GateDecision::NoUsagePeriod,
            Some(row) if !row.has_remaining() => GateDecision::LimitReached {
                used: row.used_count,
                limit: row.limit_count,
            },
            Some(row) => GateDecision::from_row(&row),
            None => GateDecision::NoUsagePeriod,
        })
    }

    /// Counts one successful generation with a single conditional increment.
    /// Concurrent callers can never push `used_count` past `limit_count`.
    pub async fn record_success(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<GateDecision, BillingError> {
        if !self.is_subscribed(user_id).await? {
            return Ok(GateDecision::NotSubscribed);
        }

        if let Some(row) = self.usage.try_increment(user_id, now).await? {
            debug!(%user_id, used = row.used_count, limit = row.limit_count, "usage recorded");
            return Ok(GateDecision::from_row(&row));
        }

        // the increment matched nothing; report why
        Ok(match self.usage.find_by_user_id(user_id).await? {
            Some(row) if row.covers(now) => GateDecision::LimitReached {
                used: row.used_count,
                limit: row.limit_count,
            },
            _ => GateDecision::NoUsagePeriod,
        })
    }

    async fn is_subscribed(&self, user_id: Uuid) -> Result<bool, BillingError> {
        Ok(self
            .entitlements
            .find_by_user_id(user_id)
            .await?
            .is_some_and(|e| e.is_paid_and_active()))
    }
}
