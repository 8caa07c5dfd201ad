use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Errors raised by the diagnostic services.
#[derive(Error, Debug)]
pub enum DiagError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Interface '{0}' not found")]
    InterfaceNotFound(String),

    #[error("{tool} failed: {reason}")]
    ToolFailure { tool: String, reason: String },

    #[error("Timed out waiting for {target}")]
    Timeout { target: String },

    #[error("{0}")]
    ExternalService(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DiagResult<T> = Result<T, DiagError>;

/// Errors surfaced to HTTP clients as a non-200 status.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl From<DiagError> for AppError {
    fn from(err: DiagError) -> Self {
        match err {
            DiagError::InvalidRequest(msg) => AppError::Validation(msg),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            AppError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        tracing::error!("{}: {}", status, message);
        (status, Json(json!({ "detail": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_request_maps_to_validation() {
        let err: AppError = DiagError::InvalidRequest("count_pkt must be >= 1".to_string()).into();
        assert!(matches!(err, AppError::Validation(ref m) if m == "count_pkt must be >= 1"));
    }

    #[test]
    fn test_validation_status() {
        let response = AppError::Validation("bad unit".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_runtime_errors_are_internal() {
        let err: AppError = DiagError::InterfaceNotFound("eth9".to_string()).into();
        assert!(matches!(err, AppError::Internal(_)));
        assert_eq!(
            AppError::Config("Invalid port: x".to_string()).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
