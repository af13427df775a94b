use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::entitlement_repository::EntitlementRepository;
use crate::db::usage_limit_repository::UsageLimitRepository;
use crate::db::user_repository::UserRepository;
use crate::db::webhook_attempt_repository::WebhookAttemptRepository;
use crate::models::entitlement::{Entitlement, EntitlementUpsert};
use crate::models::usage_limit::{UsageLimit, UsageLimitSync};
use crate::models::user::Profile;
use crate::models::webhook_attempt::{NewWebhookAttempt, WebhookAttempt, WebhookAttemptStatus};

/// In-memory stand-in for the Postgres repositories. Each method holds its
/// lock for the whole read-modify-write so it behaves like a single statement.
#[derive(Default)]
pub struct MockDb {
    pub profiles: Mutex<Vec<Profile>>,
    pub entitlements: Mutex<HashMap<Uuid, Entitlement>>,
    pub usage: Mutex<HashMap<Uuid, UsageLimit>>,
    pub attempts: Mutex<HashMap<Uuid, WebhookAttempt>>,
    /// Users whose entitlement writes fail with a database error.
    pub failing_users: Mutex<HashSet<Uuid>>,
    pub entitlement_writes: Mutex<usize>,
    pub increments: Mutex<usize>,
}

impl MockDb {
    pub fn add_profile(&self, email: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.profiles.lock().unwrap().push(Profile {
            id,
            email: Some(email.to_string()),
        });
        id
    }

    pub fn entitlement(&self, user_id: Uuid) -> Option<Entitlement> {
        self.entitlements.lock().unwrap().get(&user_id).cloned()
    }

    pub fn usage_for(&self, user_id: Uuid) -> Option<UsageLimit> {
        self.usage.lock().unwrap().get(&user_id).cloned()
    }

    pub fn put_usage(&self, usage: UsageLimit) {
        self.usage.lock().unwrap().insert(usage.user_id, usage);
    }

    pub fn put_entitlement(&self, entitlement: Entitlement) {
        self.entitlements
            .lock()
            .unwrap()
            .insert(entitlement.user_id, entitlement);
    }

    pub fn attempt(&self, id: Uuid) -> Option<WebhookAttempt> {
        self.attempts.lock().unwrap().get(&id).cloned()
    }

    pub fn fail_writes_for(&self, user_id: Uuid) {
        self.failing_users.lock().unwrap().insert(user_id);
    }
}

fn simulated_failure() -> sqlx::Error {
    sqlx::Error::Protocol("simulated database failure".into())
}

#[async_trait]
impl UserRepository for MockDb {
    async fn list_profiles_with_email(&self) -> Result<Vec<Profile>, sqlx::Error> {
        Ok(self
            .profiles
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.email.as_deref().is_some_and(|e| !e.is_empty()))
            .cloned()
            .collect())
    }

    async fn find_profile_by_email(&self, email: &str) -> Result<Option<Profile>, sqlx::Error> {
        Ok(self
            .profiles
            .lock()
            .unwrap()
            .iter()
            .find(|p| {
                p.email
                    .as_deref()
                    .is_some_and(|e| e.eq_ignore_ascii_case(email))
            })
            .cloned())
    }

    async fn find_profile_by_id(&self, user_id: Uuid) -> Result<Option<Profile>, sqlx::Error> {
        Ok(self
            .profiles
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.id == user_id)
            .cloned())
    }
}

#[async_trait]
impl EntitlementRepository for MockDb {
    async fn find_by_user_id(&self, user_id: Uuid) -> Result<Option<Entitlement>, sqlx::Error> {
        Ok(self.entitlement(user_id))
    }

    async fn find_user_id_by_customer_id(
        &self,
        stripe_customer_id: &str,
    ) -> Result<Option<Uuid>, sqlx::Error> {
        Ok(self
            .entitlements
            .lock()
            .unwrap()
            .values()
            .find(|e| e.stripe_customer_id.as_deref() == Some(stripe_customer_id))
            .map(|e| e.user_id))
    }

    async fn upsert(&self, entitlement: &EntitlementUpsert) -> Result<bool, sqlx::Error> {
        if self
            .failing_users
            .lock()
            .unwrap()
            .contains(&entitlement.user_id)
        {
            return Err(simulated_failure());
        }

        let mut rows = self.entitlements.lock().unwrap();
        let mut write = entitlement.clone();
        if let Some(existing) = rows.get(&entitlement.user_id) {
            if existing.source_version > entitlement.source_version {
                return Ok(false);
            }
            if write.stripe_customer_id.is_none() {
                write.stripe_customer_id = existing.stripe_customer_id.clone();
            }
        }

        rows.insert(
            write.user_id,
            write.into_entitlement(OffsetDateTime::now_utc()),
        );
        *self.entitlement_writes.lock().unwrap() += 1;
        Ok(true)
    }
}

#[async_trait]
impl UsageLimitRepository for MockDb {
    async fn find_by_user_id(&self, user_id: Uuid) -> Result<Option<UsageLimit>, sqlx::Error> {
        Ok(self.usage_for(user_id))
    }

    async fn sync_limit(
        &self,
        user_id: Uuid,
        limit_count: i32,
        period_start: OffsetDateTime,
        period_end: OffsetDateTime,
    ) -> Result<UsageLimitSync, sqlx::Error> {
        let mut rows = self.usage.lock().unwrap();
        let now = OffsetDateTime::now_utc();
        match rows.get_mut(&user_id) {
            Some(existing) => {
                existing.limit_count = limit_count;
                existing.period_end = period_end;
                existing.updated_at = now;
                Ok(UsageLimitSync {
                    record: existing.clone(),
                    created: false,
                })
            }
            None => {
                let record = UsageLimit {
                    user_id,
                    period_start,
                    period_end,
                    used_count: 0,
                    limit_count,
                    updated_at: now,
                };
                rows.insert(user_id, record.clone());
                Ok(UsageLimitSync {
                    record,
                    created: true,
                })
            }
        }
    }

    async fn set_limit_if_present(
        &self,
        user_id: Uuid,
        limit_count: i32,
    ) -> Result<Option<UsageLimit>, sqlx::Error> {
        let mut rows = self.usage.lock().unwrap();
        Ok(rows.get_mut(&user_id).map(|existing| {
            existing.limit_count = limit_count;
            existing.updated_at = OffsetDateTime::now_utc();
            existing.clone()
        }))
    }

    async fn try_increment(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<Option<UsageLimit>, sqlx::Error> {
        let mut rows = self.usage.lock().unwrap();
        let Some(existing) = rows.get_mut(&user_id) else {
            return Ok(None);
        };
        if !existing.covers(now) || !existing.has_remaining() {
            return Ok(None);
        }
        existing.used_count += 1;
        existing.updated_at = now;
        *self.increments.lock().unwrap() += 1;
        Ok(Some(existing.clone()))
    }

    async fn start_new_period(
        &self,
        user_id: Uuid,
        period_start: OffsetDateTime,
        period_end: OffsetDateTime,
        limit_count: i32,
    ) -> Result<bool, sqlx::Error> {
        let mut rows = self.usage.lock().unwrap();
        if let Some(existing) = rows.get(&user_id) {
            if existing.period_start >= period_start {
                return Ok(false);
            }
        }
        rows.insert(
            user_id,
            UsageLimit {
                user_id,
                period_start,
                period_end,
                used_count: 0,
                limit_count,
                updated_at: OffsetDateTime::now_utc(),
            },
        );
        Ok(true)
    }
}

#[async_trait]
impl WebhookAttemptRepository for MockDb {
    async fn record_failure(
        &self,
        attempt: &NewWebhookAttempt,
    ) -> Result<Option<WebhookAttempt>, sqlx::Error> {
        let mut rows = self.attempts.lock().unwrap();
        if rows
            .values()
            .any(|a| a.stripe_event_id == attempt.stripe_event_id)
        {
            return Ok(None);
        }

        let now = OffsetDateTime::now_utc();
        let record = WebhookAttempt {
            id: Uuid::new_v4(),
            stripe_event_id: attempt.stripe_event_id.clone(),
            event_type: attempt.event_type.clone(),
            request_payload: attempt.request_payload.clone(),
            status: WebhookAttemptStatus::Failed,
            attempt_number: 1,
            next_retry_at: attempt.next_retry_at,
            error_message: Some(attempt.error_message.clone()),
            claimed_at: None,
            created_at: now,
            updated_at: now,
        };
        rows.insert(record.id, record.clone());
        Ok(Some(record))
    }

    async fn find_by_event_id(
        &self,
        stripe_event_id: &str,
    ) -> Result<Option<WebhookAttempt>, sqlx::Error> {
        Ok(self
            .attempts
            .lock()
            .unwrap()
            .values()
            .find(|a| a.stripe_event_id == stripe_event_id)
            .cloned())
    }

    async fn claim_due(
        &self,
        now: OffsetDateTime,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<WebhookAttempt>, sqlx::Error> {
        let mut rows = self.attempts.lock().unwrap();
        let mut due: Vec<&mut WebhookAttempt> = rows
            .values_mut()
            .filter(|a| {
                a.status == WebhookAttemptStatus::Failed
                    && a.next_retry_at.is_some_and(|at| at <= now)
                    && a.attempt_number < max_attempts
            })
            .collect();
        due.sort_by_key(|a| a.next_retry_at);

        Ok(due
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(0))
            .map(|a| {
                a.status = WebhookAttemptStatus::Retrying;
                a.claimed_at = Some(now);
                a.updated_at = now;
                a.clone()
            })
            .collect())
    }

    async fn release_stale_claims(
        &self,
        claimed_before: OffsetDateTime,
    ) -> Result<u64, sqlx::Error> {
        let mut released = 0;
        for attempt in self.attempts.lock().unwrap().values_mut() {
            if attempt.status == WebhookAttemptStatus::Retrying
                && attempt.claimed_at.is_some_and(|at| at < claimed_before)
            {
                attempt.status = WebhookAttemptStatus::Failed;
                attempt.claimed_at = None;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn mark_success(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let mut rows = self.attempts.lock().unwrap();
        Ok(match rows.get_mut(&id) {
            Some(a) if a.status != WebhookAttemptStatus::Success => {
                a.status = WebhookAttemptStatus::Success;
                a.next_retry_at = None;
                a.claimed_at = None;
                a.error_message = None;
                true
            }
            _ => false,
        })
    }

    async fn mark_success_for_event(&self, stripe_event_id: &str) -> Result<bool, sqlx::Error> {
        let id = self
            .attempts
            .lock()
            .unwrap()
            .values()
            .find(|a| a.stripe_event_id == stripe_event_id)
            .map(|a| a.id);
        match id {
            Some(id) => self.mark_success(id).await,
            None => Ok(false),
        }
    }

    async fn record_retry_failure(
        &self,
        id: Uuid,
        attempt_number: i32,
        next_retry_at: Option<OffsetDateTime>,
        error_message: &str,
    ) -> Result<bool, sqlx::Error> {
        let mut rows = self.attempts.lock().unwrap();
        Ok(match rows.get_mut(&id) {
            Some(a)
                if a.status == WebhookAttemptStatus::Retrying
                    && a.attempt_number < attempt_number =>
            {
                a.status = WebhookAttemptStatus::Failed;
                a.attempt_number = attempt_number;
                a.next_retry_at = next_retry_at;
                a.error_message = Some(error_message.to_string());
                a.claimed_at = None;
                a.updated_at = OffsetDateTime::now_utc();
                true
            }
            _ => false,
        })
    }
}
