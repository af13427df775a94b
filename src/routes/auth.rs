use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
    response::Response,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use subtle::ConstantTimeEq;
use tracing::debug;
use uuid::Uuid;

use crate::responses::JsonResponse;
use crate::state::AppState;
use crate::utils::jwt::decode_access_token;

/// The signed-in end user, taken from the auth platform's access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| JsonResponse::unauthorized("Missing bearer token"))?;

        let token = decode_access_token(
            bearer.token(),
            &state.jwt_keys,
            &state.config.jwt_audience,
        )
        .map_err(|err| {
            debug!(?err, "rejected access token");
            JsonResponse::unauthorized("Invalid or expired token")
        })?;

        let user_id = Uuid::parse_str(&token.claims.sub)
            .map_err(|_| JsonResponse::unauthorized("Invalid token subject"))?;
        let email = token
            .claims
            .email
            .filter(|email| !email.trim().is_empty())
            .ok_or_else(|| JsonResponse::unauthorized("Token carries no email"))?;

        Ok(AuthUser { user_id, email })
    }
}

/// Caller presented the internal service key (cron jobs, the retry worker).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceAuth;

impl FromRequestParts<AppState> for ServiceAuth {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if service_key_matches(&parts.headers, &state.config.service_api_key) {
            Ok(ServiceAuth)
        } else {
            Err(JsonResponse::unauthorized("Invalid service credentials"))
        }
    }
}

/// Constant-time comparison of the bearer token against the service key.
pub fn service_key_matches(headers: &HeaderMap, service_key: &str) -> bool {
    let Some(token) = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
    else {
        return false;
    };
    if service_key.is_empty() {
        return false;
    }
    token.trim().as_bytes().ct_eq(service_key.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::TestApp;
    use axum::http::{header, HeaderValue, Method, Request, StatusCode};

    fn parts_with_auth(value: Option<&str>) -> Parts {
        let mut builder = Request::builder().method(Method::GET).uri("/");
        if let Some(value) = value {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn valid_token_yields_user() {
        let app = TestApp::new();
        let user_id = Uuid::new_v4();
        let token = app.token_for(user_id, "user@example.com");
        let mut parts = parts_with_auth(Some(&format!("Bearer {token}")));

        let user = AuthUser::from_request_parts(&mut parts, &app.state)
            .await
            .unwrap();
        assert_eq!(user.user_id, user_id);
        assert_eq!(user.email, "user@example.com");
    }

    #[tokio::test]
    async fn missing_or_garbage_token_is_unauthorized() {
        let app = TestApp::new();
        for header in [None, Some("Bearer not.a.jwt"), Some("Basic abc")] {
            let mut parts = parts_with_auth(header);
            let rejection = AuthUser::from_request_parts(&mut parts, &app.state)
                .await
                .unwrap_err();
            assert_eq!(rejection.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn service_key_must_match_exactly() {
        let app = TestApp::new();
        let key = app.service_key();

        let mut ok = parts_with_auth(Some(&format!("Bearer {key}")));
        assert!(ServiceAuth::from_request_parts(&mut ok, &app.state).await.is_ok());

        let mut prefix = parts_with_auth(Some(&format!("Bearer {}", &key[..key.len() - 1])));
        assert!(ServiceAuth::from_request_parts(&mut prefix, &app.state).await.is_err());

        let mut user_token = parts_with_auth(Some(&format!(
            "Bearer {}",
            app.token_for(Uuid::new_v4(), "user@example.com")
        )));
        assert!(ServiceAuth::from_request_parts(&mut user_token, &app.state)
            .await
            .is_err());
    }

    #[test]
    fn empty_service_key_never_matches() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert!(!service_key_matches(&headers, ""));
    }
}
