//! Handlers for maintenance operations under `/admin`.

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::background::task_retention;
use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CleanupQuery {
    /// Overrides `TASK_RETENTION_DAYS` for this run.
    pub days: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CleanupResult {
    pub deleted: u64,
    pub retention_days: i64,
}

/// POST /api/v1/admin/cleanup?days=
///
/// Purge terminal tasks older than `days` now instead of waiting for the
/// periodic sweep.
pub async fn cleanup(
    State(state): State<AppState>,
    Query(params): Query<CleanupQuery>,
) -> AppResult<impl IntoResponse> {
    let retention_days = params.days.unwrap_or(state.config.task_retention_days);
    if retention_days < 0 {
        return Err(AppError::BadRequest(format!(
            "days must not be negative, got {retention_days}"
        )));
    }

    let deleted = task_retention::purge(state.store.as_ref(), retention_days).await?;
    tracing::info!(deleted, retention_days, "Manual task cleanup");

    Ok(Json(DataResponse {
        data: CleanupResult {
            deleted,
            retention_days,
        },
    }))
}
