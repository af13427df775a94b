use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use tracing::{error, warn};

use crate::billing::error::BillingError;
use crate::billing::intake::{Delivery, IntakeOutcome};
use crate::responses::JsonResponse;
use crate::routes::auth::service_key_matches;
use crate::services::webhook_redelivery::RETRY_HEADER;
use crate::state::AppState;

const SIGNATURE_HEADER: &str = "Stripe-Signature";

// POST /webhook-intake
pub async fn webhook_intake(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let (delivery, payload) = if headers.contains_key(RETRY_HEADER) {
        if !service_key_matches(&headers, &state.config.service_api_key) {
            return JsonResponse::unauthorized("Invalid service credentials");
        }
        match serde_json::from_slice::<Value>(&body) {
            Ok(payload) => (Delivery::Retry, payload),
            Err(err) => return JsonResponse::bad_request(&format!("Invalid JSON body: {err}")),
        }
    } else {
        let Some(sig) = headers.get(SIGNATURE_HEADER).and_then(|h| h.to_str().ok()) else {
            return JsonResponse::bad_request("Missing Stripe-Signature");
        };
        match state.stripe.verify_webhook(&body, sig) {
            Ok(event) => (Delivery::Live, event.payload),
            Err(err) => {
                warn!(?err, "stripe webhook verification failed");
                return JsonResponse::bad_request("invalid webhook");
            }
        }
    };

    match state.intake.handle(payload, delivery).await {
        Ok(IntakeOutcome::RetryScheduled { .. }) => (
            StatusCode::ACCEPTED,
            Json(json!({ "received": true, "retry_scheduled": true })),
        )
            .into_response(),
        Ok(IntakeOutcome::Duplicate) => {
            Json(json!({ "received": true, "duplicate": true })).into_response()
        }
        Ok(_) => Json(json!({ "received": true })).into_response(),
        Err(BillingError::InvalidPayload(msg)) => {
            warn!(%msg, "rejected malformed billing event");
            JsonResponse::bad_request(&msg)
        }
        Err(BillingError::EventInProgress(event_id)) => {
            JsonResponse::conflict(&format!("Event {event_id} is already being processed"))
        }
        Err(err) => {
            error!(?err, ?delivery, "billing event processing failed");
            JsonResponse::server_error("Billing event processing failed")
        }
    }
}
