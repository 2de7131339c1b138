//! Handlers for the `/tasks` resource.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use talkvid_core::error::CoreError;
use talkvid_core::status::TaskStatus;
use talkvid_core::task::TaskView;
use talkvid_worker::SubmitTask;
use tokio_util::io::ReaderStream;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Page size used when `limit` is not given.
const DEFAULT_LIST_LIMIT: i64 = 50;

#[derive(Debug, Deserialize)]
pub struct TaskListQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CancelQuery {
    #[serde(default)]
    pub force: bool,
}

fn task_not_found(task_id: &str) -> AppError {
    AppError::Core(CoreError::NotFound {
        entity: "Task",
        id: task_id.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/tasks
///
/// Queue a new generation task. Returns 201 with the `pending` task.
pub async fn submit_task(
    State(state): State<AppState>,
    Json(input): Json<SubmitTask>,
) -> AppResult<impl IntoResponse> {
    let task_id = state.supervisor.submit(input).await?;
    let view = state
        .supervisor
        .get_status(&task_id)
        .await?
        .ok_or_else(|| task_not_found(&task_id))?;

    Ok((StatusCode::CREATED, Json(DataResponse { data: view })))
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// GET /api/v1/tasks
///
/// Newest first. Supports optional `status` (name) and `limit` query
/// parameters.
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(params): Query<TaskListQuery>,
) -> AppResult<impl IntoResponse> {
    let status = params
        .status
        .as_deref()
        .map(str::parse::<TaskStatus>)
        .transpose()
        .map_err(AppError::BadRequest)?;
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT);

    let now = Utc::now();
    let views: Vec<TaskView> = state
        .supervisor
        .list(status, limit)
        .await?
        .into_iter()
        .map(|task| TaskView::from_task(task, now))
        .collect();

    Ok(Json(DataResponse { data: views }))
}

/// GET /api/v1/tasks/active
pub async fn list_active(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let now = Utc::now();
    let views: Vec<TaskView> = state
        .supervisor
        .list_active()
        .await?
        .into_iter()
        .map(|task| TaskView::from_task(task, now))
        .collect();

    Ok(Json(DataResponse { data: views }))
}

// ---------------------------------------------------------------------------
// Get / delete
// ---------------------------------------------------------------------------

/// GET /api/v1/tasks/{id}
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let view = state
        .supervisor
        .get_status(&task_id)
        .await?
        .ok_or_else(|| task_not_found(&task_id))?;
    Ok(Json(DataResponse { data: view }))
}

/// DELETE /api/v1/tasks/{id}
///
/// Returns 204, or 409 while the task is still active.
pub async fn delete_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> AppResult<StatusCode> {
    state.supervisor.delete(&task_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// POST /api/v1/tasks/{id}/cancel?force=
///
/// Signals the job and waits for it to exit. Returns 409 if the task has
/// no process to stop.
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Query(params): Query<CancelQuery>,
) -> AppResult<impl IntoResponse> {
    let outcome = state.supervisor.cancel(&task_id, params.force).await?;
    Ok(Json(DataResponse { data: outcome }))
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// GET /api/v1/tasks/{id}/output
///
/// Streams the generated video of a successful task.
pub async fn download_output(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> AppResult<Response> {
    let path = state
        .supervisor
        .output_file(&task_id)
        .await?
        .ok_or_else(|| AppError::Core(CoreError::NotFound {
            entity: "Output",
            id: task_id.clone(),
        }))?;

    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?;
    let size = file
        .metadata()
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?
        .len();
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{task_id}.mp4"));

    Ok((
        [
            (header::CONTENT_TYPE, "video/mp4".to_string()),
            (header::CONTENT_LENGTH, size.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}
