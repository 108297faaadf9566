use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use storyreel_core::planning::ProjectDefaults;
use storyreel_core::task::Task;
use storyreel_core::types::EntityId;

use crate::error::AppResult;
use crate::handlers::CancelParams;
use crate::response::DataResponse;
use crate::state::AppState;

/// Tasks created by [`plan_project`].
#[derive(Debug, Serialize)]
pub struct PlannedTasks {
    pub storyboard: Task,
    pub shot_tasks: Vec<Task>,
}

/// POST /api/v1/projects/{id}/plan
///
/// Create the storyboard task and one blocked image task per shot, and
/// queue the storyboard.
pub async fn plan_project(
    State(state): State<AppState>,
    Path(project_id): Path<EntityId>,
    Json(defaults): Json<ProjectDefaults>,
) -> AppResult<impl IntoResponse> {
    let plan = state.engine.plan_project(project_id, &defaults).await?;
    let data = PlannedTasks {
        storyboard: plan.storyboard,
        shot_tasks: plan.shot_tasks,
    };
    Ok((StatusCode::CREATED, Json(DataResponse::new(data))))
}

/// POST /api/v1/projects/{id}/tasks/cancel
///
/// Cancel every task of the project that has not ended. Responds with the
/// tasks cancelled directly.
pub async fn cancel_project_tasks(
    State(state): State<AppState>,
    Path(project_id): Path<EntityId>,
    Query(params): Query<CancelParams>,
) -> AppResult<impl IntoResponse> {
    let cancelled = state
        .engine
        .cancel_project_tasks(project_id, params.reason.as_deref())
        .await?;
    tracing::info!(project_id = %project_id, count = cancelled.len(), "Project tasks cancelled");
    Ok(Json(DataResponse::new(cancelled)))
}
