//! Route definitions for the `/tasks` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::tasks;
use crate::state::AppState;
use crate::ws;

/// Routes mounted at `/tasks`.
///
/// ```text
/// POST   /                -> create_task
/// GET    /{id}            -> get_task
/// POST   /{id}/cancel     -> cancel_task
/// GET    /{id}/ws         -> task_events_ws
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(tasks::create_task))
        .route("/{id}", get(tasks::get_task))
        .route("/{id}/cancel", post(tasks::cancel_task))
        .route("/{id}/ws", get(ws::task_events_ws))
}
