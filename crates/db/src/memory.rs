//! In-process store.
//!
//! Records live in hash maps behind a single `RwLock` each, with a side
//! vector that remembers insertion order so listings are deterministic.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use storyreel_core::shot::{NewShot, Shot, ShotAsset};
use storyreel_core::task::{StatusUpdate, Task, TaskParams, TaskStatus};
use storyreel_core::types::{new_id, EntityId};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::store::{ShotStore, Store, TaskStore};

struct Table<T> {
    rows: HashMap<EntityId, T>,
    order: Vec<EntityId>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            rows: HashMap::new(),
            order: Vec::new(),
        }
    }
}

impl<T: Clone> Table<T> {
    fn insert(&mut self, id: EntityId, row: T) {
        if self.rows.insert(id, row).is_none() {
            self.order.push(id);
        }
    }

    fn ordered(&self) -> impl Iterator<Item = &T> {
        self.order.iter().filter_map(|id| self.rows.get(id))
    }
}

/// Store backed by process memory. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    tasks: RwLock<Table<Task>>,
    shots: RwLock<Table<Shot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove a task, as a collaborator deleting it mid-flight would.
    pub async fn delete_task(&self, id: EntityId) -> bool {
        let mut tasks = self.tasks.write().await;
        tasks.order.retain(|t| *t != id);
        tasks.rows.remove(&id).is_some()
    }

    async fn filter_tasks(&self, pred: impl Fn(&Task) -> bool) -> Vec<Task> {
        self.tasks
            .read()
            .await
            .ordered()
            .filter(|t| pred(*t))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn get_task(&self, id: EntityId) -> Result<Task, StoreError> {
        self.tasks
            .read()
            .await
            .rows
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("Task", id))
    }

    async fn get_tasks(&self, ids: &[EntityId]) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.read().await;
        Ok(ids.iter().filter_map(|id| tasks.rows.get(id).cloned()).collect())
    }

    async fn insert_tasks(&self, new_tasks: &[Task]) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().await;
        if let Some(dup) = new_tasks.iter().find(|t| tasks.rows.contains_key(&t.id)) {
            return Err(StoreError::Conflict(format!("Task {} already exists", dup.id)));
        }
        for task in new_tasks {
            tasks.insert(task.id, task.clone());
        }
        Ok(())
    }

    async fn update_status(&self, id: EntityId, update: &StatusUpdate) -> Result<Task, StoreError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .rows
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("Task", id))?;
        // Apply to a copy so a rejected update leaves the record untouched.
        let mut next = task.clone();
        next.apply(update, Utc::now())?;
        *task = next.clone();
        Ok(next)
    }

    async fn update_progress(
        &self,
        id: EntityId,
        progress: u8,
        message: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .rows
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("Task", id))?;
        task.apply_progress(progress, message, Utc::now());
        Ok(())
    }

    async fn bind_shot(
        &self,
        id: EntityId,
        shot_id: EntityId,
        parameters: &TaskParams,
    ) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .rows
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("Task", id))?;
        task.shot_id = Some(shot_id);
        task.parameters = Some(parameters.clone());
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn release_if_blocked(&self, id: EntityId) -> Result<bool, StoreError> {
        let mut tasks = self.tasks.write().await;
        match tasks.rows.get_mut(&id) {
            Some(task) if task.status == TaskStatus::Blocked => {
                task.status = TaskStatus::Pending;
                task.updated_at = Utc::now();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::not_found("Task", id)),
        }
    }

    async fn list_dependents(&self, dependency_id: EntityId) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .filter_tasks(|t| t.depends_on.contains(&dependency_id))
            .await)
    }

    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError> {
        Ok(self.filter_tasks(|t| t.status == status).await)
    }

    async fn list_active_by_project(&self, project_id: EntityId) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .filter_tasks(|t| t.project_id == project_id && !t.status.is_terminal())
            .await)
    }

    async fn list_active_by_shot(&self, shot_id: EntityId) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .filter_tasks(|t| t.target_shot() == Some(shot_id) && !t.status.is_terminal())
            .await)
    }
}

#[async_trait]
impl ShotStore for MemoryStore {
    async fn create_shots(
        &self,
        project_id: EntityId,
        new_shots: Vec<NewShot>,
    ) -> Result<Vec<Shot>, StoreError> {
        let now = Utc::now();
        let created: Vec<Shot> = new_shots
            .into_iter()
            .map(|s| s.into_shot(new_id(), project_id, now))
            .collect();

        let mut shots = self.shots.write().await;
        for shot in &created {
            shots.insert(shot.id, shot.clone());
        }
        Ok(created)
    }

    async fn get_shot(&self, id: EntityId) -> Result<Shot, StoreError> {
        self.shots
            .read()
            .await
            .rows
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("Shot", id))
    }

    async fn list_shots(&self, project_id: EntityId) -> Result<Vec<Shot>, StoreError> {
        let mut shots: Vec<Shot> = self
            .shots
            .read()
            .await
            .ordered()
            .filter(|s| s.project_id == project_id)
            .cloned()
            .collect();
        shots.sort_by_key(|s| s.order);
        Ok(shots)
    }

    async fn set_shot_asset(
        &self,
        id: EntityId,
        asset: ShotAsset,
        url: &str,
    ) -> Result<Shot, StoreError> {
        let mut shots = self.shots.write().await;
        let shot = shots
            .rows
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("Shot", id))?;
        shot.set_asset(asset, url.to_string(), Utc::now());
        Ok(shot.clone())
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
