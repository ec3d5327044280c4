//! Bearer access-token extraction for HTTP routes.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::error::{ApiErrorBody, ApiErrorDetail};
use crate::gateway::session::SessionUser;
use crate::AppState;

/// Authenticated user extracted from the `Authorization: Bearer <jwt>` header.
#[derive(Debug, Clone)]
pub struct AuthUser(pub SessionUser);

/// Rejection returned when the bearer token is missing or invalid.
pub struct AuthError {
    message: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: ApiErrorDetail {
                code: "UNAUTHORIZED".to_string(),
                message: self.message,
            },
        };
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

/// Pull the token out of an `Authorization: Bearer` header value.
pub fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or_else(|| AuthError {
            message: "Missing or malformed Authorization header".to_string(),
        })?;

        let user = state
            .verifier
            .verify(token)
            .await
            .map_err(|err| AuthError {
                message: err.client_message(),
            })?;

        Ok(AuthUser(user))
    }
}
