use std::sync::Arc;

use sqlx::PgPool;

use crate::billing::intake::WebhookIntake;
use crate::billing::reconcile::ReconciliationService;
use crate::billing::retry::{RetryPolicy, WebhookRetryScheduler};
use crate::billing::tiers::TierCatalog;
use crate::billing::usage::UsageGate;
use crate::config::Config;
use crate::db::postgres_entitlement_repository::PostgresEntitlementRepository;
use crate::db::postgres_stripe_event_log_repository::PostgresStripeEventLogRepository;
use crate::db::postgres_usage_limit_repository::PostgresUsageLimitRepository;
use crate::db::postgres_user_repository::PostgresUserRepository;
use crate::db::postgres_webhook_attempt_repository::PostgresWebhookAttemptRepository;
use crate::db::{
    entitlement_repository::EntitlementRepository,
    stripe_event_log_repository::StripeEventLogRepository,
    usage_limit_repository::UsageLimitRepository, user_repository::UserRepository,
    webhook_attempt_repository::WebhookAttemptRepository,
};
use crate::services::stripe::StripeService;
use crate::services::webhook_redelivery::WebhookRedelivery;
use crate::utils::jwt::{JwtKeys, JwtSecretError};

#[derive(Clone)]
pub struct Repositories {
    pub users: Arc<dyn UserRepository>,
    pub entitlements: Arc<dyn EntitlementRepository>,
    pub usage: Arc<dyn UsageLimitRepository>,
    pub event_log: Arc<dyn StripeEventLogRepository>,
    pub attempts: Arc<dyn WebhookAttemptRepository>,
}

impl Repositories {
    pub fn postgres(pool: &PgPool) -> Self {
        Self {
            users: Arc::new(PostgresUserRepository { pool: pool.clone() }),
            entitlements: Arc::new(PostgresEntitlementRepository { pool: pool.clone() }),
            usage: Arc::new(PostgresUsageLimitRepository { pool: pool.clone() }),
            event_log: Arc::new(PostgresStripeEventLogRepository { pool: pool.clone() }),
            attempts: Arc::new(PostgresWebhookAttemptRepository { pool: pool.clone() }),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub jwt_keys: Arc<JwtKeys>,
    pub stripe: Arc<dyn StripeService>,
    pub reconciler: Arc<ReconciliationService>,
    pub usage_gate: Arc<UsageGate>,
    pub intake: Arc<WebhookIntake>,
    pub retry_scheduler: Arc<WebhookRetryScheduler>,
}

impl AppState {
    pub fn new(
        config: Config,
        repos: Repositories,
        stripe: Arc<dyn StripeService>,
        redelivery: Arc<dyn WebhookRedelivery>,
    ) -> Result<Self, JwtSecretError> {
        let jwt_keys = JwtKeys::from_secret(&config.supabase_jwt_secret)?;
        let catalog = TierCatalog::from_settings(&config.stripe, config.usage_limits);
        let policy = RetryPolicy::from_settings(&config.retry);

        let reconciler = Arc::new(ReconciliationService::new(
            repos.users.clone(),
            repos.entitlements.clone(),
            repos.usage.clone(),
            stripe.clone(),
            catalog,
            config.stripe.is_test_mode(),
            config.sync.concurrency,
        ));
        let usage_gate = Arc::new(UsageGate::new(
            repos.entitlements.clone(),
            repos.usage.clone(),
        ));
        let intake = Arc::new(WebhookIntake::new(
            repos.users.clone(),
            repos.entitlements.clone(),
            repos.usage.clone(),
            repos.event_log.clone(),
            repos.attempts.clone(),
            stripe.clone(),
            reconciler.clone(),
            policy,
        ));
        let retry_scheduler = Arc::new(WebhookRetryScheduler::new(
            repos.attempts.clone(),
            redelivery,
            policy,
        ));

        Ok(Self {
            config: Arc::new(config),
            jwt_keys: Arc::new(jwt_keys),
            stripe,
            reconciler,
            usage_gate,
            intake,
            retry_scheduler,
        })
    }
}
