//! Route definitions for the `/admin` resource.

use axum::routing::post;
use axum::Router;

use crate::handlers::admin;
use crate::state::AppState;

/// Routes mounted at `/admin`.
///
/// ```text
/// POST   /cleanup          -> cleanup (?days=)
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/cleanup", post(admin::cleanup))
}
