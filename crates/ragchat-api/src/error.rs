//! API error types and JSON error response formatting.
//!
//! ApiError gives every endpoint the same JSON error body and maps
//! [`RagChatError`] variants to HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use ragchat_core::error::RagChatError;

/// JSON error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "bad_request", "not_found").
    pub error: String,
    /// Human-readable error message.
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// API error type that maps to HTTP status codes and JSON responses.
#[derive(Debug)]
pub enum ApiError {
    /// 400 Bad Request - missing or invalid input.
    BadRequest(String),
    /// 401 Unauthorized - missing, invalid, or foreign credential.
    Unauthorized(String),
    /// 404 Not Found - unknown or expired session.
    NotFound(String),
    /// 409 Conflict - the session is not ready for this operation.
    Conflict(String),
    /// 422 Unprocessable Entity - uploads that can't be indexed.
    UnprocessableEntity(String),
    /// 502 Bad Gateway - the model provider failed. Carries the partial
    /// reply when generation broke off mid-stream.
    BadGateway {
        message: String,
        partial: Option<String>,
    },
    /// 500 Internal Server Error - unexpected server error.
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::UnprocessableEntity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::BadGateway { .. } => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The JSON body, also used for SSE `error` events.
    pub fn body(self) -> ErrorBody {
        let (code, message, details) = match self {
            ApiError::BadRequest(msg) => ("bad_request", msg, None),
            ApiError::Unauthorized(msg) => ("unauthorized", msg, None),
            ApiError::NotFound(msg) => ("not_found", msg, None),
            ApiError::Conflict(msg) => ("not_ready", msg, None),
            ApiError::UnprocessableEntity(msg) => ("unprocessable_entity", msg, None),
            ApiError::BadGateway { message, partial } => (
                "generation_failed",
                message,
                partial.map(|p| serde_json::json!({ "partial": p })),
            ),
            ApiError::Internal(msg) => ("internal_error", msg, None),
        };
        ErrorBody {
            error: code.to_string(),
            message,
            details,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(self.body())).into_response()
    }
}

impl From<RagChatError> for ApiError {
    fn from(err: RagChatError) -> Self {
        match err {
            RagChatError::AuthInvalid => ApiError::Unauthorized(err.to_string()),
            RagChatError::SessionNotFound(_) => ApiError::NotFound(err.to_string()),
            RagChatError::NotReady(msg) => ApiError::Conflict(msg),
            RagChatError::EmptyUpload
            | RagChatError::EmptyMessage
            | RagChatError::MessageTooLong(_)
            | RagChatError::InvalidChatMode(_) => ApiError::BadRequest(err.to_string()),
            RagChatError::IndexBuild(msg) => ApiError::UnprocessableEntity(msg),
            RagChatError::Generation { message, partial } => ApiError::BadGateway {
                message,
                partial: Some(partial),
            },
            RagChatError::Provider(msg) => ApiError::BadGateway {
                message: msg,
                partial: None,
            },
            _ => ApiError::Internal(err.to_string()),
        }
    }
}
