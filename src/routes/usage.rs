use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::error;

use crate::billing::usage::GateDecision;
use crate::responses::JsonResponse;
use crate::routes::auth::AuthUser;
use crate::state::AppState;

#[derive(Debug, Serialize)]
struct UsageStatus {
    allowed: bool,
    #[serde(flatten)]
    decision: GateDecision,
}

// GET /api/usage/images
pub async fn image_usage(State(state): State<AppState>, user: AuthUser) -> Response {
    match state
        .usage_gate
        .check(user.user_id, OffsetDateTime::now_utc())
        .await
    {
        Ok(decision) => Json(UsageStatus {
            allowed: decision.is_allowed(),
            decision,
        })
        .into_response(),
        Err(err) => {
            error!(?err, user_id = %user.user_id, "usage check failed");
            JsonResponse::server_error("Usage check failed")
        }
    }
}

// POST /api/usage/images/consume
pub async fn consume_image(State(state): State<AppState>, user: AuthUser) -> Response {
    let decision = match state
        .usage_gate
        .record_success(user.user_id, OffsetDateTime::now_utc())
        .await
    {
        Ok(decision) => decision,
        Err(err) => {
            error!(?err, user_id = %user.user_id, "usage increment failed");
            return JsonResponse::server_error("Usage increment failed");
        }
    };

    match decision {
        GateDecision::Allowed { .. } => Json(UsageStatus {
            allowed: true,
            decision,
        })
        .into_response(),
        GateDecision::NotSubscribed => JsonResponse::error_with_code(
            StatusCode::PAYMENT_REQUIRED,
            "An active paid subscription is required",
            "not_subscribed",
        ),
        GateDecision::NoUsagePeriod => JsonResponse::error_with_code(
            StatusCode::PAYMENT_REQUIRED,
            "No usage period is active for this subscription",
            "no_usage_period",
        ),
        GateDecision::LimitReached { used, limit } => JsonResponse::error_with_code(
            StatusCode::TOO_MANY_REQUESTS,
            &format!("Image limit reached ({used}/{limit}) for this billing period"),
            "limit_reached",
        ),
    }
}

#[cfg(test)]
mod tests {
    use crate::models::entitlement::EntitlementUpsert;
    use crate::models::plan::PlanTier;
    use crate::models::usage_limit::UsageLimit;
    use crate::routes::app_router;
    use crate::state::test_support::TestApp;
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use serde_json::Value;
    use time::{Duration, OffsetDateTime};
    use tower::ServiceExt;
    use uuid::Uuid;

    fn subscribed(app: &TestApp, used: i32, limit: i32) -> Uuid {
        let user_id = app.db.add_profile("maker@example.com");
        let mut write = EntitlementUpsert::free(user_id, Some("cus_1".into()), 1);
        write.plan_tier = PlanTier::Pro;
        write.status = "active".into();
        let now = OffsetDateTime::now_utc();
        app.db.put_entitlement(write.into_entitlement(now));
        app.db.put_usage(UsageLimit {
            user_id,
            period_start: now - Duration::days(3),
            period_end: now + Duration::days(27),
            used_count: used,
            limit_count: limit,
            updated_at: now,
        });
        user_id
    }

    async fn call(app: &TestApp, method: Method, uri: &str, user_id: Uuid) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", app.token_for(user_id, "maker@example.com")),
            )
            .body(Body::empty())
            .unwrap();
        let resp = app_router(app.state.clone()).oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn status_reports_remaining_quota() {
        let app = TestApp::new();
        let user_id = subscribed(&app, 3, 500);

        let (status, body) = call(&app, Method::GET, "/api/usage/images", user_id).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["allowed"], true);
        assert_eq!(body["decision"], "allowed");
        assert_eq!(body["used"], 3);
        assert_eq!(body["limit"], 500);
    }

    #[tokio::test]
    async fn consume_counts_until_the_limit() {
        let app = TestApp::new();
        let user_id = subscribed(&app, 1, 2);

        let (status, body) = call(&app, Method::POST, "/api/usage/images/consume", user_id).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["used"], 2);

        let (status, body) = call(&app, Method::POST, "/api/usage/images/consume", user_id).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["code"], "limit_reached");
        assert_eq!(app.db.usage_for(user_id).unwrap().used_count, 2);
    }

    #[tokio::test]
    async fn free_user_must_subscribe() {
        let app = TestApp::new();
        let user_id = app.db.add_profile("maker@example.com");

        let (status, body) = call(&app, Method::POST, "/api/usage/images/consume", user_id).await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["code"], "not_subscribed");

        let (status, body) = call(&app, Method::GET, "/api/usage/images", user_id).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["allowed"], false);
        assert_eq!(body["decision"], "not_subscribed");
    }
}
