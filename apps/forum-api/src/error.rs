use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::db::StoreError;
use crate::gateway::events::MAX_CONTENT_CHARS;

/// Structured API error returned to clients.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorBody {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldError>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Application-level error type that converts into an HTTP response.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub details: Option<Vec<FieldError>>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "BAD_REQUEST".to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: "UNAUTHORIZED".to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "INTERNAL_ERROR".to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn validation(details: Vec<FieldError>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "VALIDATION_ERROR".to_string(),
            message: "Validation failed".to_string(),
            details: Some(details),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: ApiErrorDetail {
                code: self.code,
                message: self.message,
                details: self.details,
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

/// Why an inbound chat frame was rejected.
///
/// Every variant is local to the originating connection: the sender gets a
/// system message, nothing is persisted or broadcast.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("malformed frame: {0}")]
    InvalidFormat(#[from] serde_json::Error),

    #[error("clients may not send system messages")]
    ReservedKind,

    #[error("content is {len} characters, limit is {max}", max = MAX_CONTENT_CHARS)]
    ContentTooLong { len: usize },

    #[error("recipient {0} has no live connection")]
    RecipientUnavailable(i64),

    #[error("message could not be persisted")]
    Persistence(#[source] StoreError),
}

impl ChatError {
    /// Text of the system message sent back to the sender.
    pub fn notice(&self) -> String {
        match self {
            Self::InvalidFormat(_) => "Invalid message format.".to_string(),
            Self::ReservedKind => "System messages cannot be sent by clients.".to_string(),
            Self::ContentTooLong { .. } => format!(
                "Cannot send message. The content exceeds {MAX_CONTENT_CHARS} characters."
            ),
            Self::RecipientUnavailable(_) => "Cannot send message. The user is offline.".to_string(),
            Self::Persistence(_) => "Failed to send your message. Please try again.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notices_match_client_copy() {
        assert_eq!(
            ChatError::ContentTooLong { len: 51 }.notice(),
            "Cannot send message. The content exceeds 50 characters."
        );
        assert_eq!(
            ChatError::RecipientUnavailable(7).notice(),
            "Cannot send message. The user is offline."
        );
        assert_eq!(
            ChatError::Persistence(StoreError::Unavailable("down".into())).notice(),
            "Failed to send your message. Please try again."
        );
    }

    #[test]
    fn invalid_json_maps_to_format_error() {
        let err: ChatError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, ChatError::InvalidFormat(_)));
        assert_eq!(err.notice(), "Invalid message format.");
    }
}
