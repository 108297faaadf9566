//! Row mapping for the `tasks` table.

use serde_json::Value;
use sqlx::FromRow;
use storyreel_core::task::{Task, TaskParams, TaskResult};
use storyreel_core::types::{EntityId, Timestamp};

use crate::error::StoreError;

/// A row from the `tasks` table.
#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    pub id: EntityId,
    pub project_id: EntityId,
    pub shot_id: Option<EntityId>,
    pub task_type: String,
    pub status: String,
    pub progress: i16,
    pub message: String,
    pub error: String,
    pub parameters: Option<Value>,
    pub result: Option<Value>,
    pub depends_on: Vec<EntityId>,
    pub estimated_duration_secs: i32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
}

impl TryFrom<TaskRow> for Task {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let parameters = row
            .parameters
            .map(serde_json::from_value::<TaskParams>)
            .transpose()?;
        let result = row
            .result
            .map(serde_json::from_value::<TaskResult>)
            .transpose()?;

        Ok(Task {
            id: row.id,
            project_id: row.project_id,
            shot_id: row.shot_id,
            task_type: row.task_type.parse()?,
            status: row.status.parse()?,
            progress: row.progress.clamp(0, 100) as u8,
            message: row.message,
            error: row.error,
            parameters,
            result,
            depends_on: row.depends_on,
            estimated_duration_secs: row.estimated_duration_secs.max(0) as u32,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}
