use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use storyreel_cloud::StorageError;
use storyreel_core::error::CoreError;
use storyreel_pipeline::PipelineError;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`PipelineError`] for engine errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// An error from the orchestration engine.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// An error reading a stored object for `/files`.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// A request whose signature or expiry does not check out.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        Self::Pipeline(err.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- Engine errors ---
            AppError::Pipeline(err) => classify_pipeline_error(err),

            // --- Storage errors ---
            AppError::Storage(err) => match err {
                StorageError::NotFound(key) => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("object {key} not found"),
                ),
                StorageError::InvalidKey(key) => (
                    StatusCode::BAD_REQUEST,
                    "BAD_REQUEST",
                    format!("invalid object key '{key}'"),
                ),
                other => internal(other),
            },

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
            AppError::InternalError(msg) => internal(msg),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Map engine errors to HTTP status codes.
///
/// Only caller mistakes are echoed back; everything else is logged and
/// reported as a generic 500.
fn classify_pipeline_error(err: &PipelineError) -> (StatusCode, &'static str, String) {
    match err {
        PipelineError::NotFound { entity, id } => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{entity} with id {id} not found"),
        ),
        PipelineError::Validation(msg) => {
            (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
        }
        PipelineError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
        PipelineError::Queue(e) => {
            tracing::warn!(error = %e, "Task queue rejected work");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                "The task queue is not accepting work".to_string(),
            )
        }
        other => internal(other),
    }
}

fn internal(err: impl std::fmt::Display) -> (StatusCode, &'static str, String) {
    tracing::error!(error = %err, "Internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}
