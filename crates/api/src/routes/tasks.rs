//! Route definitions for the `/tasks` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{logs, tasks};
use crate::state::AppState;

/// Routes mounted at `/tasks`.
///
/// ```text
/// GET    /                 -> list_tasks
/// POST   /                 -> submit_task
/// GET    /active           -> list_active
/// GET    /{id}             -> get_task
/// DELETE /{id}             -> delete_task
/// POST   /{id}/cancel      -> cancel_task
/// GET    /{id}/logs        -> get_logs
/// GET    /{id}/logs/tail   -> tail_logs
/// GET    /{id}/output      -> download_output
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(tasks::list_tasks).post(tasks::submit_task))
        .route("/active", get(tasks::list_active))
        .route("/{id}", get(tasks::get_task).delete(tasks::delete_task))
        .route("/{id}/cancel", post(tasks::cancel_task))
        .route("/{id}/logs", get(logs::get_logs))
        .route("/{id}/logs/tail", get(logs::tail_logs))
        .route("/{id}/output", get(tasks::download_output))
}
