//! PostgreSQL-backed store.

use async_trait::async_trait;
use chrono::Utc;
use storyreel_core::shot::{NewShot, Shot, ShotAsset};
use storyreel_core::task::{StatusUpdate, Task, TaskParams, TaskStatus};
use storyreel_core::types::{new_id, EntityId};

use crate::error::StoreError;
use crate::repositories::{ShotRepo, TaskRepo};
use crate::store::{ShotStore, Store, TaskStore};
use crate::DbPool;

/// Store backed by a PostgreSQL pool.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl TaskStore for PgStore {
    async fn get_task(&self, id: EntityId) -> Result<Task, StoreError> {
        TaskRepo::find_by_id(&self.pool, id)
            .await?
            .ok_or_else(|| StoreError::not_found("Task", id))
    }

    async fn get_tasks(&self, ids: &[EntityId]) -> Result<Vec<Task>, StoreError> {
        TaskRepo::find_many(&self.pool, ids).await
    }

    async fn insert_tasks(&self, tasks: &[Task]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for task in tasks {
            TaskRepo::insert(&mut *tx, task).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn update_status(&self, id: EntityId, update: &StatusUpdate) -> Result<Task, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut task = TaskRepo::find_for_update(&mut *tx, id)
            .await?
            .ok_or_else(|| StoreError::not_found("Task", id))?;
        task.apply(update, Utc::now())?;
        TaskRepo::write_state(&mut *tx, &task).await?;
        tx.commit().await?;
        Ok(task)
    }

    async fn update_progress(
        &self,
        id: EntityId,
        progress: u8,
        message: Option<&str>,
    ) -> Result<(), StoreError> {
        let progress = i16::from(progress.min(100));
        if !TaskRepo::update_progress(&self.pool, id, progress, message).await? {
            return Err(StoreError::not_found("Task", id));
        }
        Ok(())
    }

    async fn bind_shot(
        &self,
        id: EntityId,
        shot_id: EntityId,
        parameters: &TaskParams,
    ) -> Result<(), StoreError> {
        let parameters = serde_json::to_value(parameters)?;
        if !TaskRepo::bind_shot(&self.pool, id, shot_id, &parameters).await? {
            return Err(StoreError::not_found("Task", id));
        }
        Ok(())
    }

    async fn release_if_blocked(&self, id: EntityId) -> Result<bool, StoreError> {
        TaskRepo::release_if_blocked(&self.pool, id).await
    }

    async fn list_dependents(&self, dependency_id: EntityId) -> Result<Vec<Task>, StoreError> {
        TaskRepo::list_dependents(&self.pool, dependency_id).await
    }

    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError> {
        TaskRepo::list_by_status(&self.pool, status).await
    }

    async fn list_active_by_project(&self, project_id: EntityId) -> Result<Vec<Task>, StoreError> {
        TaskRepo::list_active_by_project(&self.pool, project_id).await
    }

    async fn list_active_by_shot(&self, shot_id: EntityId) -> Result<Vec<Task>, StoreError> {
        TaskRepo::list_active_by_shot(&self.pool, shot_id).await
    }
}

#[async_trait]
impl ShotStore for PgStore {
    async fn create_shots(
        &self,
        project_id: EntityId,
        shots: Vec<NewShot>,
    ) -> Result<Vec<Shot>, StoreError> {
        let now = Utc::now();
        let created: Vec<Shot> = shots
            .into_iter()
            .map(|s| s.into_shot(new_id(), project_id, now))
            .collect();

        let mut tx = self.pool.begin().await?;
        for shot in &created {
            ShotRepo::insert(&mut *tx, shot).await?;
        }
        tx.commit().await?;
        Ok(created)
    }

    async fn get_shot(&self, id: EntityId) -> Result<Shot, StoreError> {
        ShotRepo::find_by_id(&self.pool, id)
            .await?
            .ok_or_else(|| StoreError::not_found("Shot", id))
    }

    async fn list_shots(&self, project_id: EntityId) -> Result<Vec<Shot>, StoreError> {
        ShotRepo::list_by_project(&self.pool, project_id).await
    }

    async fn set_shot_asset(
        &self,
        id: EntityId,
        asset: ShotAsset,
        url: &str,
    ) -> Result<Shot, StoreError> {
        ShotRepo::set_asset(&self.pool, id, asset, url)
            .await?
            .ok_or_else(|| StoreError::not_found("Shot", id))
    }
}

#[async_trait]
impl Store for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        crate::health_check(&self.pool).await?;
        Ok(())
    }
}
