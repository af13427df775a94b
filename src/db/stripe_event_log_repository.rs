use std::time::Duration;

use async_trait::async_trait;

/// Outcome of trying to take processing rights for a billing event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClaim {
    Claimed,
    AlreadySucceeded,
    InProgress,
}

#[async_trait]
pub trait StripeEventLogRepository: Send + Sync {
    /// Claims the event unless it already succeeded or another worker holds a
    /// claim younger than `stale_after`. Failed events can be claimed again.
    async fn claim_event(
        &self,
        event_id: &str,
        event_type: &str,
        stale_after: Duration,
    ) -> Result<EventClaim, sqlx::Error>;

    async fn mark_succeeded(&self, event_id: &str) -> Result<(), sqlx::Error>;

    async fn mark_failed(&self, event_id: &str, error_message: &str) -> Result<(), sqlx::Error>;
}
