use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

use crate::observability::QueryError;

/// Application error types
#[derive(Debug)]
pub enum AppError {
    /// Rejected query parameters
    BadRequest(String),
    /// Requested record does not exist
    NotFound(String),
    /// Internal server error
    InternalError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            Self::NotFound(msg) => write!(f, "Not found: {}", msg),
            Self::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Self::InternalError(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch request details".to_string())
            }
        };

        let body = Json(json!({
            "error": {
                "message": error_message,
                "type": error_type_name(&self),
            }
        }));

        (status, body).into_response()
    }
}

fn error_type_name(error: &AppError) -> &'static str {
    match error {
        AppError::BadRequest(_) => "invalid_request",
        AppError::NotFound(_) => "not_found",
        AppError::InternalError(_) => "internal_error",
    }
}

impl From<QueryError> for AppError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::Invalid(msg) => Self::BadRequest(msg),
            QueryError::Storage(e) => Self::InternalError(e.to_string()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::InternalError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = AppError::NotFound("req-1".to_string());
        assert_eq!(error.to_string(), "Not found: req-1");
    }

    #[test]
    fn test_query_error_maps_to_bad_request() {
        let error: AppError = QueryError::Invalid("Page must be >= 1".to_string()).into();
        assert!(matches!(error, AppError::BadRequest(_)));
        assert_eq!(error_type_name(&error), "invalid_request");
    }

    #[tokio::test]
    async fn test_error_response() {
        let error = AppError::BadRequest("PageSize must be between 1 and 100".to_string());
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = AppError::InternalError("disk I/O error".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
