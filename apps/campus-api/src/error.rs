use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::stores::StoreError;

/// Structured API error returned to HTTP clients.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorBody {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
}

/// Application-level error type that converts into an HTTP response.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "BAD_REQUEST".to_string(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "INTERNAL_ERROR".to_string(),
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: ApiErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        tracing::error!(?err, "store error");
        Self::internal("An internal error occurred")
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        let status = match &err {
            GatewayError::Authentication(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Validation { .. } => StatusCode::BAD_REQUEST,
            GatewayError::Authorization { .. } => StatusCode::FORBIDDEN,
            GatewayError::Persistence { .. } | GatewayError::Internal(_) => {
                tracing::error!(?err, "gateway error on http path");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            code: err.code().to_string(),
            message: err.client_message(),
        }
    }
}

// ---------------------------------------------------------------------------
// Realtime error taxonomy
// ---------------------------------------------------------------------------

/// Machine-readable codes carried in `error` events.
pub mod codes {
    pub const AUTHENTICATION_FAILED: &str = "AUTHENTICATION_FAILED";
    pub const ALREADY_AUTHENTICATED: &str = "ALREADY_AUTHENTICATED";
    pub const INVALID_EVENT: &str = "INVALID_EVENT";
    pub const INVALID_PAYLOAD: &str = "INVALID_PAYLOAD";
    pub const INVALID_POSITION: &str = "INVALID_POSITION";
    pub const INVALID_MESSAGE: &str = "INVALID_MESSAGE";
    pub const ROOM_NOT_FOUND: &str = "ROOM_NOT_FOUND";
    pub const ROOM_INACTIVE: &str = "ROOM_INACTIVE";
    pub const ROOM_FULL: &str = "ROOM_FULL";
    pub const PASSWORD_REQUIRED: &str = "PASSWORD_REQUIRED";
    pub const INVALID_PASSWORD: &str = "INVALID_PASSWORD";
    pub const NOT_IN_ROOM: &str = "NOT_IN_ROOM";
    pub const CHAT_MESSAGE_ERROR: &str = "CHAT_MESSAGE_ERROR";
    pub const CHAT_HISTORY_ERROR: &str = "CHAT_HISTORY_ERROR";
    pub const ROOM_ENTER_ERROR: &str = "ROOM_ENTER_ERROR";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// Everything that can go wrong while serving a gateway connection.
///
/// Only `Authentication` ever ends a connection, and only before it is
/// registered. Every other variant becomes an `error` event for the
/// originating connection.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("{message}")]
    Validation { code: &'static str, message: String },

    #[error("{message}")]
    Authorization { code: &'static str, message: String },

    #[error("{message}: {source}")]
    Persistence {
        code: &'static str,
        message: String,
        #[source]
        source: StoreError,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn authentication(reason: impl Into<String>) -> Self {
        Self::Authentication(reason.into())
    }

    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            code,
            message: message.into(),
        }
    }

    pub fn authorization(code: &'static str, message: impl Into<String>) -> Self {
        Self::Authorization {
            code,
            message: message.into(),
        }
    }

    pub fn persistence(code: &'static str, message: impl Into<String>, source: StoreError) -> Self {
        Self::Persistence {
            code,
            message: message.into(),
            source,
        }
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal(detail.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Authentication(_) => codes::AUTHENTICATION_FAILED,
            Self::Validation { code, .. }
            | Self::Authorization { code, .. }
            | Self::Persistence { code, .. } => code,
            Self::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    /// The message shown to clients. Internal details and store errors
    /// never leave the process.
    pub fn client_message(&self) -> String {
        match self {
            Self::Authentication(reason) => reason.clone(),
            Self::Validation { message, .. }
            | Self::Authorization { message, .. }
            | Self::Persistence { message, .. } => message.clone(),
            Self::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_errors_hide_details_from_clients() {
        let err = GatewayError::internal("registry already holds conn_123");
        assert_eq!(err.code(), codes::INTERNAL_ERROR);
        assert_eq!(err.client_message(), "An internal error occurred");
    }

    #[test]
    fn persistence_errors_keep_their_code_but_not_the_source() {
        let err = GatewayError::persistence(
            codes::CHAT_MESSAGE_ERROR,
            "Failed to send message",
            StoreError::Unavailable("connection refused".into()),
        );
        assert_eq!(err.code(), codes::CHAT_MESSAGE_ERROR);
        assert_eq!(err.client_message(), "Failed to send message");
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn http_mapping_follows_taxonomy() {
        let api: ApiError = GatewayError::authentication("Invalid or expired token").into();
        assert_eq!(api.status, StatusCode::UNAUTHORIZED);

        let api: ApiError = GatewayError::authorization(codes::NOT_IN_ROOM, "nope").into();
        assert_eq!(api.status, StatusCode::FORBIDDEN);
        assert_eq!(api.code, codes::NOT_IN_ROOM);

        let api: ApiError = GatewayError::validation(codes::INVALID_PAYLOAD, "bad").into();
        assert_eq!(api.status, StatusCode::BAD_REQUEST);
    }
}
