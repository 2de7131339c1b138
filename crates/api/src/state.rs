use std::sync::Arc;

use talkvid_core::store::TaskStore;
use talkvid_worker::Supervisor;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Job supervisor: submission, status, cancellation, logs.
    pub supervisor: Arc<Supervisor>,
    /// Task store shared with the supervisor.
    pub store: Arc<dyn TaskStore>,
    /// PostgreSQL pool, when the server runs against a database.
    pub pool: Option<talkvid_db::DbPool>,
    pub config: Arc<ServerConfig>,
}
