pub mod entitlement;
pub mod plan;
pub mod usage_limit;
pub mod user;
pub mod webhook_attempt;
