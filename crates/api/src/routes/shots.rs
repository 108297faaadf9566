use axum::routing::post;
use axum::Router;

use crate::handlers::shots;
use crate::state::AppState;

/// Routes mounted at `/shots`.
///
/// ```text
/// POST   /{id}/tasks/cancel   -> cancel_shot_tasks
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/{id}/tasks/cancel", post(shots::cancel_shot_tasks))
}
