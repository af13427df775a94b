use thiserror::Error;

use crate::services::stripe::StripeServiceError;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("billing configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Stripe(#[from] StripeServiceError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid billing event payload: {0}")]
    InvalidPayload(String),
    #[error("event {0} is already being processed")]
    EventInProgress(String),
}
