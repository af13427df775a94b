use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use time::OffsetDateTime;
use tracing::{error, info};
use uuid::Uuid;

use crate::billing::error::BillingError;
use crate::responses::JsonResponse;
use crate::routes::auth::{AuthUser, ServiceAuth};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreRequest {
    pub user_id: Uuid,
    pub user_email: String,
}

// POST /api/billing/check-subscription
pub async fn check_subscription(State(state): State<AppState>, user: AuthUser) -> Response {
    match state
        .reconciler
        .check_subscription(user.user_id, &user.email)
        .await
    {
        Ok(check) => Json(check).into_response(),
        Err(err) => {
            error!(?err, user_id = %user.user_id, "subscription check failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "subscribed": false, "error": err.to_string() })),
            )
                .into_response()
        }
    }
}

// POST /api/billing/sync-subscriptions
pub async fn sync_subscriptions(State(state): State<AppState>, _auth: ServiceAuth) -> Response {
    match state.reconciler.sync_all().await {
        Ok(summary) => Json(json!({
            "success": true,
            "synced": summary.synced,
            "errors": summary.errors,
        }))
        .into_response(),
        Err(BillingError::Config(msg)) => JsonResponse::bad_request(&msg),
        Err(err) => {
            error!(?err, "subscription sync failed");
            JsonResponse::server_error("Subscription sync failed")
        }
    }
}

// POST /api/billing/restore-subscription
pub async fn restore_subscription(
    State(state): State<AppState>,
    _auth: ServiceAuth,
    Json(body): Json<RestoreRequest>,
) -> Response {
    let email = body.user_email.trim();
    if email.is_empty() {
        return JsonResponse::bad_request("userEmail is required");
    }
    run_restore(&state, body.user_id, email).await
}

// POST /api/billing/restore-my-subscription
pub async fn restore_my_subscription(State(state): State<AppState>, user: AuthUser) -> Response {
    run_restore(&state, user.user_id, &user.email).await
}

async fn run_restore(state: &AppState, user_id: Uuid, email: &str) -> Response {
    match state.reconciler.restore(user_id, email).await {
        Ok(outcome) => {
            info!(%user_id, restored = outcome.restored, "restore requested");
            Json(outcome).into_response()
        }
        Err(err) => {
            error!(?err, %user_id, "subscription restore failed");
            JsonResponse::server_error("Subscription restore failed")
        }
    }
}

// POST /api/billing/retry-failed-webhooks
pub async fn retry_failed_webhooks(State(state): State<AppState>, _auth: ServiceAuth) -> Response {
    match state
        .retry_scheduler
        .run_pass(OffsetDateTime::now_utc())
        .await
    {
        Ok(summary) => Json(json!({
            "success": true,
            "processed": summary.processed,
            "succeeded": summary.succeeded,
            "failed": summary.failed,
            "exhausted": summary.exhausted,
        }))
        .into_response(),
        Err(err) => {
            error!(?err, "webhook retry pass failed");
            JsonResponse::server_error("Webhook retry pass failed")
        }
    }
}
