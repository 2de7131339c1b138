use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;
use talkvid_core::status::ACTIVE_STATUSES;
use talkvid_core::store::TaskStore;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// `postgres` or `memory`.
    pub store: &'static str,
    /// Whether the task store answered.
    pub store_healthy: bool,
    /// Tasks currently holding a GPU slot (`processing` or `running`).
    pub active_tasks: Option<usize>,
    pub max_concurrent: usize,
}

/// GET /health -- returns service and store health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_healthy = match &state.pool {
        Some(pool) => talkvid_db::health_check(pool).await.is_ok(),
        None => true,
    };
    let active_tasks = state
        .store
        .list_tasks_by_status(&ACTIVE_STATUSES)
        .await
        .map(|tasks| tasks.len())
        .ok();

    let store_healthy = db_healthy && active_tasks.is_some();
    let status = if store_healthy { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        store: if state.pool.is_some() { "postgres" } else { "memory" },
        store_healthy,
        active_tasks,
        max_concurrent: state.supervisor.config().max_concurrent,
    })
}

/// Mount health check routes (intended for root-level, NOT under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
