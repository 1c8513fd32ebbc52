use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Error taxonomy for the live session and assessment core.
///
/// Validation and authorization failures are terminal for the request (no
/// retry); storage errors have already been through the store's bounded
/// retry loop by the time they surface here.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("authorization error: {0}")]
    Authorization(String),

    #[error("session is not joinable: {0}")]
    SessionNotJoinable(String),

    #[error("session is closed")]
    SessionClosed,

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: &'static str, to: &'static str },

    #[error("incomplete attempt: {0}")]
    IncompleteAttempt(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("server configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Authorization(_) => StatusCode::FORBIDDEN,
            ApiError::SessionNotJoinable(_) => StatusCode::CONFLICT,
            ApiError::SessionClosed => StatusCode::CONFLICT,
            ApiError::InvalidTransition { .. } => StatusCode::CONFLICT,
            ApiError::IncompleteAttempt(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "internal error");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            ApiError::Validation("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Authorization("x".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(ApiError::SessionClosed.status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::InvalidTransition { from: "ended", to: "live" }.status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::IncompleteAttempt("x".into()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(ApiError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Config("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
