use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use atelier_core::error::CoreError;
use atelier_db::store::StoreError;
use atelier_queue::QueueError;

/// Application-level error type for HTTP handlers.
///
/// Wraps domain errors from the pipeline crates and adds HTTP-specific
/// variants. Implements [`IntoResponse`] to produce consistent JSON error
/// responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `atelier_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A job store error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A queue error.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Missing or malformed caller identity.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} with id {id} not found"),
                ),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
                CoreError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
                CoreError::Internal(msg) => {
                    tracing::error!(error = %msg, "Internal core error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "An internal error occurred".to_string(),
                    )
                }
            },

            AppError::Store(err) => match err {
                StoreError::NotFound(id) => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("Job with id {id} not found"),
                ),
                StoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
                StoreError::Database(db) => {
                    tracing::error!(error = %db, "Job store database error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "An internal error occurred".to_string(),
                    )
                }
            },

            AppError::Queue(err) => {
                tracing::error!(error = %err, "Queue error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }

            AppError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone())
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
