use axum::routing::post;
use axum::Router;

use crate::handlers::projects;
use crate::state::AppState;

/// Routes mounted at `/projects`.
///
/// ```text
/// POST   /{id}/plan           -> plan_project
/// POST   /{id}/tasks/cancel   -> cancel_project_tasks
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{id}/plan", post(projects::plan_project))
        .route("/{id}/tasks/cancel", post(projects::cancel_project_tasks))
}
