use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookAttemptStatus {
    Failed,
    Retrying,
    Success,
}

impl WebhookAttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookAttemptStatus::Failed => "failed",
            WebhookAttemptStatus::Retrying => "retrying",
            WebhookAttemptStatus::Success => "success",
        }
    }
}

impl fmt::Display for WebhookAttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WebhookAttemptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "failed" => Ok(WebhookAttemptStatus::Failed),
            "retrying" => Ok(WebhookAttemptStatus::Retrying),
            "success" => Ok(WebhookAttemptStatus::Success),
            other => Err(format!("unknown webhook attempt status: {other}")),
        }
    }
}

/// One inbound billing event that failed processing, plus its retry history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookAttempt {
    pub id: Uuid,
    pub stripe_event_id: String,
    pub event_type: String,
    pub request_payload: Value,
    pub status: WebhookAttemptStatus,
    pub attempt_number: i32,
    #[serde(with = "time::serde::rfc3339::option")]
    pub next_retry_at: Option<OffsetDateTime>,
    pub error_message: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub claimed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewWebhookAttempt {
    pub stripe_event_id: String,
    pub event_type: String,
    pub request_payload: Value,
    pub error_message: String,
    pub next_retry_at: Option<OffsetDateTime>,
}
