pub mod files;
pub mod health;
pub mod projects;
pub mod shots;
pub mod tasks;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /tasks                            create
/// /tasks/{id}                       get
/// /tasks/{id}/cancel                cancel (POST, optional ?reason=)
/// /tasks/{id}/ws                    task event stream (WebSocket)
///
/// /projects/{id}/plan               plan storyboard and shot tasks (POST)
/// /projects/{id}/tasks/cancel       cancel every active project task (POST)
///
/// /shots/{id}/tasks/cancel          cancel every active shot task (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/tasks", tasks::router())
        .nest("/projects", projects::router())
        .nest("/shots", shots::router())
}
