use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use storyreel_core::types::EntityId;

use crate::error::AppResult;
use crate::handlers::CancelParams;
use crate::response::DataResponse;
use crate::state::AppState;

/// POST /api/v1/shots/{id}/tasks/cancel
///
/// Cancel every task targeting the shot that has not ended.
pub async fn cancel_shot_tasks(
    State(state): State<AppState>,
    Path(shot_id): Path<EntityId>,
    Query(params): Query<CancelParams>,
) -> AppResult<impl IntoResponse> {
    let cancelled = state
        .engine
        .cancel_shot_tasks(shot_id, params.reason.as_deref())
        .await?;
    tracing::info!(shot_id = %shot_id, count = cancelled.len(), "Shot tasks cancelled");
    Ok(Json(DataResponse::new(cancelled)))
}
