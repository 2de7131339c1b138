use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use talkvid_core::error::CoreError;
use talkvid_core::store::StoreError;
use talkvid_worker::{CancelError, DeleteError, LogError, SubmitError};

/// Application-level error type for HTTP handlers.
///
/// Wraps the supervisor's per-operation errors and adds HTTP-specific
/// variants. Implements [`IntoResponse`] to produce consistent JSON error
/// responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `talkvid_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error(transparent)]
    Cancel(#[from] CancelError),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Delete(#[from] DeleteError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

type Classified = (StatusCode, &'static str, String);

fn internal(error: &dyn std::fmt::Display) -> Classified {
    tracing::error!(error = %error, "Internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

fn not_found(message: String) -> Classified {
    (StatusCode::NOT_FOUND, "NOT_FOUND", message)
}

fn conflict(message: String) -> Classified {
    (StatusCode::CONFLICT, "CONFLICT", message)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => {
                    not_found(format!("{entity} with id {id} not found"))
                }
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::Conflict(msg) => conflict(msg.clone()),
                CoreError::Internal(msg) => internal(msg),
            },

            AppError::Store(err) => internal(err),

            // --- Supervisor operations ---
            AppError::Submit(err) => match err {
                SubmitError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                SubmitError::Store(e) => internal(e),
            },
            AppError::Cancel(err) => match err {
                CancelError::NotFound(_) => not_found(err.to_string()),
                CancelError::NotRunning { .. } => conflict(err.to_string()),
                CancelError::SignalFailed { .. } | CancelError::Store(_) => internal(err),
            },
            AppError::Log(err) => match err {
                LogError::InvalidId(_) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", err.to_string())
                }
                LogError::TaskNotFound(_) | LogError::LogNotFound(_) => not_found(err.to_string()),
                LogError::Io(_) | LogError::Store(_) => internal(err),
            },
            AppError::Delete(err) => match err {
                DeleteError::NotFound(_) => not_found(err.to_string()),
                DeleteError::Active(_) => conflict(err.to_string()),
                DeleteError::Store(e) => internal(e),
            },

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => internal(msg),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
