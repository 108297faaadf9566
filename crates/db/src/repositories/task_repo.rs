//! Repository for the `tasks` table.
//!
//! Status values are stored by their wire names; the transition table is
//! enforced in Rust by [`Task::apply`] inside a row-locking transaction.

use sqlx::{PgConnection, PgPool};
use storyreel_core::task::{Task, TaskStatus};
use storyreel_core::types::EntityId;

use crate::error::StoreError;
use crate::models::task::TaskRow;

/// Column list for `tasks` queries.
const COLUMNS: &str = "\
    id, project_id, shot_id, task_type, status, progress, message, error, \
    parameters, result, depends_on, estimated_duration_secs, \
    created_at, updated_at, started_at, finished_at";

/// Statuses a task may still leave.
const ACTIVE_STATUSES: [&str; 3] = ["pending", "blocked", "processing"];

fn into_tasks(rows: Vec<TaskRow>) -> Result<Vec<Task>, StoreError> {
    rows.into_iter().map(Task::try_from).collect()
}

/// Provides CRUD operations for task records.
pub struct TaskRepo;

impl TaskRepo {
    pub async fn find_by_id(pool: &PgPool, id: EntityId) -> Result<Option<Task>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM tasks WHERE id = $1");
        sqlx::query_as::<_, TaskRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await?
            .map(Task::try_from)
            .transpose()
    }

    /// Load a task and lock its row until the surrounding transaction ends.
    pub async fn find_for_update(
        conn: &mut PgConnection,
        id: EntityId,
    ) -> Result<Option<Task>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM tasks WHERE id = $1 FOR UPDATE");
        sqlx::query_as::<_, TaskRow>(&query)
            .bind(id)
            .fetch_optional(conn)
            .await?
            .map(Task::try_from)
            .transpose()
    }

    pub async fn find_many(pool: &PgPool, ids: &[EntityId]) -> Result<Vec<Task>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM tasks WHERE id = ANY($1) ORDER BY seq");
        let rows = sqlx::query_as::<_, TaskRow>(&query)
            .bind(ids)
            .fetch_all(pool)
            .await?;
        into_tasks(rows)
    }

    pub async fn insert(conn: &mut PgConnection, task: &Task) -> Result<(), StoreError> {
        let parameters = task.parameters.as_ref().map(serde_json::to_value).transpose()?;
        let result = task.result.as_ref().map(serde_json::to_value).transpose()?;

        sqlx::query(
            "INSERT INTO tasks (id, project_id, shot_id, task_type, status, progress, message, \
             error, parameters, result, depends_on, estimated_duration_secs, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(task.id)
        .bind(task.project_id)
        .bind(task.shot_id)
        .bind(task.task_type.as_str())
        .bind(task.status.as_str())
        .bind(i16::from(task.progress))
        .bind(&task.message)
        .bind(&task.error)
        .bind(parameters)
        .bind(result)
        .bind(&task.depends_on)
        .bind(task.estimated_duration_secs as i32)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Write back the mutable fields of a task whose row is locked.
    pub async fn write_state(conn: &mut PgConnection, task: &Task) -> Result<(), StoreError> {
        let result = task.result.as_ref().map(serde_json::to_value).transpose()?;

        sqlx::query(
            "UPDATE tasks SET status = $2, progress = $3, message = $4, error = $5, \
             result = $6, started_at = $7, finished_at = $8, updated_at = $9 \
             WHERE id = $1",
        )
        .bind(task.id)
        .bind(task.status.as_str())
        .bind(i16::from(task.progress))
        .bind(&task.message)
        .bind(&task.error)
        .bind(result)
        .bind(task.started_at)
        .bind(task.finished_at)
        .bind(task.updated_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Update progress and message unless the task is already terminal.
    /// Returns `false` when no row exists.
    pub async fn update_progress(
        pool: &PgPool,
        id: EntityId,
        progress: i16,
        message: Option<&str>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE tasks SET progress = $2, message = COALESCE($3, message), updated_at = NOW() \
             WHERE id = $1 AND status = ANY($4)",
        )
        .bind(id)
        .bind(progress)
        .bind(message)
        .bind(&ACTIVE_STATUSES[..])
        .execute(pool)
        .await?;
        if result.rows_affected() > 0 {
            return Ok(true);
        }
        Ok(Self::exists(pool, id).await?)
    }

    pub async fn bind_shot(
        pool: &PgPool,
        id: EntityId,
        shot_id: EntityId,
        parameters: &serde_json::Value,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE tasks SET shot_id = $2, parameters = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(shot_id)
        .bind(parameters)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Compare-and-set `blocked` to `pending`.
    pub async fn release_if_blocked(pool: &PgPool, id: EntityId) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE tasks SET status = $2, updated_at = NOW() WHERE id = $1 AND status = $3",
        )
        .bind(id)
        .bind(TaskStatus::Pending.as_str())
        .bind(TaskStatus::Blocked.as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_dependents(
        pool: &PgPool,
        dependency_id: EntityId,
    ) -> Result<Vec<Task>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM tasks WHERE $1 = ANY(depends_on) ORDER BY seq");
        let rows = sqlx::query_as::<_, TaskRow>(&query)
            .bind(dependency_id)
            .fetch_all(pool)
            .await?;
        into_tasks(rows)
    }

    pub async fn list_by_status(pool: &PgPool, status: TaskStatus) -> Result<Vec<Task>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM tasks WHERE status = $1 ORDER BY seq");
        let rows = sqlx::query_as::<_, TaskRow>(&query)
            .bind(status.as_str())
            .fetch_all(pool)
            .await?;
        into_tasks(rows)
    }

    pub async fn list_active_by_project(
        pool: &PgPool,
        project_id: EntityId,
    ) -> Result<Vec<Task>, StoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM tasks WHERE project_id = $1 AND status = ANY($2) ORDER BY seq"
        );
        let rows = sqlx::query_as::<_, TaskRow>(&query)
            .bind(project_id)
            .bind(&ACTIVE_STATUSES[..])
            .fetch_all(pool)
            .await?;
        into_tasks(rows)
    }

    /// Active tasks owned by a shot, or naming it in their shot parameters.
    pub async fn list_active_by_shot(
        pool: &PgPool,
        shot_id: EntityId,
    ) -> Result<Vec<Task>, StoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM tasks \
             WHERE (shot_id = $1 OR parameters->>'shot_id' = $1::text) AND status = ANY($2) \
             ORDER BY seq"
        );
        let rows = sqlx::query_as::<_, TaskRow>(&query)
            .bind(shot_id)
            .bind(&ACTIVE_STATUSES[..])
            .fetch_all(pool)
            .await?;
        into_tasks(rows)
    }

    async fn exists(pool: &PgPool, id: EntityId) -> Result<bool, sqlx::Error> {
        let row: Option<(EntityId,)> = sqlx::query_as("SELECT id FROM tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }
}
