//! Storage traits consumed by the orchestration engine.

use async_trait::async_trait;
use storyreel_core::shot::{NewShot, Shot, ShotAsset};
use storyreel_core::task::{StatusUpdate, Task, TaskParams, TaskStatus};
use storyreel_core::types::EntityId;

use crate::error::StoreError;

/// Task record persistence.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Load one task. Missing tasks are [`StoreError::NotFound`].
    async fn get_task(&self, id: EntityId) -> Result<Task, StoreError>;

    /// Load several tasks; ids that do not exist are skipped.
    async fn get_tasks(&self, ids: &[EntityId]) -> Result<Vec<Task>, StoreError>;

    /// Insert new task records, preserving the slice order.
    async fn insert_tasks(&self, tasks: &[Task]) -> Result<(), StoreError>;

    /// Apply a status write. Transitions the state machine does not allow
    /// fail with [`StoreError::Conflict`] and leave the record untouched.
    async fn update_status(&self, id: EntityId, update: &StatusUpdate) -> Result<Task, StoreError>;

    /// Mirror worker progress onto a non-terminal task.
    async fn update_progress(
        &self,
        id: EntityId,
        progress: u8,
        message: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Point a task at a shot and replace its parameters.
    async fn bind_shot(
        &self,
        id: EntityId,
        shot_id: EntityId,
        parameters: &TaskParams,
    ) -> Result<(), StoreError>;

    /// Move a task from `blocked` to `pending` if, and only if, it is still
    /// blocked. Returns whether this call performed the release.
    async fn release_if_blocked(&self, id: EntityId) -> Result<bool, StoreError>;

    /// Tasks whose dependency set contains `dependency_id`, in creation order.
    async fn list_dependents(&self, dependency_id: EntityId) -> Result<Vec<Task>, StoreError>;

    /// Tasks currently in `status`, in creation order.
    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError>;

    /// Non-terminal tasks owned by a project.
    async fn list_active_by_project(&self, project_id: EntityId) -> Result<Vec<Task>, StoreError>;

    /// Non-terminal tasks targeting a shot.
    async fn list_active_by_shot(&self, shot_id: EntityId) -> Result<Vec<Task>, StoreError>;
}

/// Shot record persistence.
#[async_trait]
pub trait ShotStore: Send + Sync {
    /// Create shots under a project in one batch.
    async fn create_shots(
        &self,
        project_id: EntityId,
        shots: Vec<NewShot>,
    ) -> Result<Vec<Shot>, StoreError>;

    async fn get_shot(&self, id: EntityId) -> Result<Shot, StoreError>;

    /// Shots of a project ordered by their storyboard order.
    async fn list_shots(&self, project_id: EntityId) -> Result<Vec<Shot>, StoreError>;

    /// Record a generated asset URL on a shot.
    async fn set_shot_asset(
        &self,
        id: EntityId,
        asset: ShotAsset,
        url: &str,
    ) -> Result<Shot, StoreError>;

    async fn update_shot_image(&self, id: EntityId, url: &str) -> Result<Shot, StoreError> {
        self.set_shot_asset(id, ShotAsset::Image, url).await
    }

    async fn update_shot_audio(&self, id: EntityId, url: &str) -> Result<Shot, StoreError> {
        self.set_shot_asset(id, ShotAsset::Audio, url).await
    }

    async fn update_shot_video(&self, id: EntityId, url: &str) -> Result<Shot, StoreError> {
        self.set_shot_asset(id, ShotAsset::Video, url).await
    }
}

/// A complete storage backend.
#[async_trait]
pub trait Store: TaskStore + ShotStore {
    /// Short backend name for health output.
    fn backend(&self) -> &'static str;

    /// Confirm the backend is reachable.
    async fn ping(&self) -> Result<(), StoreError>;
}
