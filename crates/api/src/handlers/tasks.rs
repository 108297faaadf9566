//! Handlers for the `/tasks` resource.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use storyreel_core::task::NewTask;
use storyreel_core::types::EntityId;

use crate::error::AppResult;
use crate::handlers::CancelParams;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// POST /api/v1/tasks
///
/// Create a task. Tasks without dependencies, or whose dependencies have
/// all finished, are queued right away; the rest start out blocked.
pub async fn create_task(
    State(state): State<AppState>,
    Json(input): Json<NewTask>,
) -> AppResult<impl IntoResponse> {
    let task = state.engine.create_task(input).await?;
    tracing::info!(
        task_id = %task.id,
        task_type = %task.task_type,
        status = %task.status,
        "Task created via API",
    );
    Ok((StatusCode::CREATED, Json(DataResponse::new(task))))
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

/// GET /api/v1/tasks/{id}
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<EntityId>,
) -> AppResult<impl IntoResponse> {
    let task = state.engine.get_task(id).await?;
    Ok(Json(DataResponse::new(task)))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// POST /api/v1/tasks/{id}/cancel
///
/// Cancel a task that has not ended. Returns 409 if it already has.
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<EntityId>,
    Query(params): Query<CancelParams>,
) -> AppResult<impl IntoResponse> {
    let task = state
        .engine
        .cancel_task(id, params.reason.as_deref())
        .await?;
    Ok(Json(DataResponse::new(task)))
}
