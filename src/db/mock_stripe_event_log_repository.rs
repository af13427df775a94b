use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::db::stripe_event_log_repository::{EventClaim, StripeEventLogRepository};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggedStatus {
    Processing,
    Succeeded,
    Failed,
}

#[derive(Clone, Default)]
pub struct MockStripeEventLogRepository {
    events: Arc<Mutex<HashMap<String, (LoggedStatus, OffsetDateTime)>>>,
    pub claims: Arc<Mutex<usize>>,
}

impl MockStripeEventLogRepository {
    pub fn status_of(&self, event_id: &str) -> Option<LoggedStatus> {
        self.events
            .lock()
            .unwrap()
            .get(event_id)
            .map(|(status, _)| *status)
    }

    /// Pretends another worker started processing at `started_at`.
    pub fn hold_claim(&self, event_id: &str, started_at: OffsetDateTime) {
        self.events
            .lock()
            .unwrap()
            .insert(event_id.to_string(), (LoggedStatus::Processing, started_at));
    }
}

#[async_trait]
impl StripeEventLogRepository for MockStripeEventLogRepository {
    async fn claim_event(
        &self,
        event_id: &str,
        _event_type: &str,
        stale_after: Duration,
    ) -> Result<EventClaim, sqlx::Error> {
        *self.claims.lock().unwrap() += 1;
        let now = OffsetDateTime::now_utc();
        let mut events = self.events.lock().unwrap();

        let claim = match events.get(event_id) {
            None | Some((LoggedStatus::Failed, _)) => EventClaim::Claimed,
            Some((LoggedStatus::Succeeded, _)) => EventClaim::AlreadySucceeded,
            Some((LoggedStatus::Processing, started)) => {
                if now - *started > stale_after {
                    EventClaim::Claimed
                } else {
                    EventClaim::InProgress
                }
            }
        };

        if claim == EventClaim::Claimed {
            events.insert(event_id.to_string(), (LoggedStatus::Processing, now));
        }
        Ok(claim)
    }

    async fn mark_succeeded(&self, event_id: &str) -> Result<(), sqlx::Error> {
        self.events.lock().unwrap().insert(
            event_id.to_string(),
            (LoggedStatus::Succeeded, OffsetDateTime::now_utc()),
        );
        Ok(())
    }

    async fn mark_failed(&self, event_id: &str, _error_message: &str) -> Result<(), sqlx::Error> {
        self.events.lock().unwrap().insert(
            event_id.to_string(),
            (LoggedStatus::Failed, OffsetDateTime::now_utc()),
        );
        Ok(())
    }
}
