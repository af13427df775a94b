pub mod entitlement_repository;
pub mod postgres_entitlement_repository;
pub mod postgres_stripe_event_log_repository;
pub mod postgres_usage_limit_repository;
pub mod postgres_user_repository;
pub mod postgres_webhook_attempt_repository;
pub mod stripe_event_log_repository;
pub mod usage_limit_repository;
pub mod user_repository;
pub mod webhook_attempt_repository;

#[cfg(test)]
pub mod mock_db;
#[cfg(test)]
pub mod mock_stripe_event_log_repository;
