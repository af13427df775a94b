pub mod auth;
pub mod billing;
pub mod stripe;
pub mod usage;

use axum::{
    response::Response,
    routing::{get, post},
    Router,
};

use crate::responses::JsonResponse;
use crate::state::AppState;

/// Routes called by end users with an access token.
pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/billing/check-subscription",
            post(billing::check_subscription),
        )
        .route(
            "/api/billing/restore-my-subscription",
            post(billing::restore_my_subscription),
        )
        .route("/api/usage/images", get(usage::image_usage))
        .route("/api/usage/images/consume", post(usage::consume_image))
}

/// Routes called by cron triggers, the retry worker, and Stripe.
pub fn service_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/billing/sync-subscriptions",
            post(billing::sync_subscriptions),
        )
        .route(
            "/api/billing/restore-subscription",
            post(billing::restore_subscription),
        )
        .route(
            "/api/billing/retry-failed-webhooks",
            post(billing::retry_failed_webhooks),
        )
        .route("/webhook-intake", post(stripe::webhook_intake))
        .route("/health", get(health))
}

/// Full application without transport layers.
pub fn app_router(state: AppState) -> Router {
    user_routes().merge(service_routes()).with_state(state)
}

async fn health() -> Response {
    JsonResponse::success("ok")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::TestApp;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_needs_no_auth() {
        let app = TestApp::new();
        let resp = app_router(app.state.clone())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
