pub mod admin;
pub mod health;
pub mod tasks;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /tasks                                  list, submit
/// /tasks/active                           processing and running tasks
/// /tasks/{id}                             get, delete
/// /tasks/{id}/cancel                      cancel (POST, ?force=)
/// /tasks/{id}/logs                        snapshot, or SSE with ?follow=true
/// /tasks/{id}/logs/tail                   last lines (?lines=)
/// /tasks/{id}/output                      generated video
/// /admin/cleanup                          purge old terminal tasks (POST, ?days=)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/tasks", tasks::router())
        .nest("/admin", admin::router())
}
