//! Dependency Resolver: move blocked tasks on once their prerequisites end.
//!
//! - A prerequisite finishing releases each dependent whose whole dependency
//!   set is finished (`blocked -> pending`) and enqueues it.
//! - A prerequisite failing or being cancelled cascades: blocked dependents,
//!   and theirs in turn, fail or are cancelled with it.
//!
//! Releases go through [`TaskStore::release_if_blocked`], so of two callers
//! racing on the same dependent only one enqueues it.
//!
//! [`TaskStore::release_if_blocked`]: storyreel_db::TaskStore::release_if_blocked

use std::sync::Arc;

use storyreel_core::task::{StatusUpdate, Task, TaskStatus};
use storyreel_core::types::EntityId;
use storyreel_db::{Store, StoreError};
use storyreel_queue::{QueueError, TaskQueue};

use crate::status::StatusWriter;

/// What one resolver pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Tasks moved from `blocked` to `pending` and enqueued.
    pub released: Vec<EntityId>,
    /// Tasks failed or cancelled because a prerequisite did.
    pub cascaded: Vec<EntityId>,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.released.is_empty() && self.cascaded.is_empty()
    }

    fn merge(&mut self, other: Resolution) {
        self.released.extend(other.released);
        self.cascaded.extend(other.cascaded);
    }
}

enum Readiness {
    Ready,
    Waiting,
    /// A prerequisite ended without finishing.
    Broken(Task),
}

pub struct DependencyResolver {
    store: Arc<dyn Store>,
    queue: Arc<TaskQueue>,
    writer: StatusWriter,
}

impl DependencyResolver {
    pub fn new(store: Arc<dyn Store>, queue: Arc<TaskQueue>, writer: StatusWriter) -> Self {
        Self {
            store,
            queue,
            writer,
        }
    }

    /// React to `task` reaching a terminal status. Non-terminal tasks are
    /// ignored.
    pub async fn on_terminal(&self, task: &Task) -> Result<Resolution, StoreError> {
        match task.status {
            TaskStatus::Finished => self.on_finished(task.id).await,
            TaskStatus::Failed | TaskStatus::Cancelled => self.cascade(task).await,
            _ => Ok(Resolution::default()),
        }
    }

    /// Release the blocked dependents of `task_id` whose dependencies are
    /// now all finished.
    pub async fn on_finished(&self, task_id: EntityId) -> Result<Resolution, StoreError> {
        let mut resolution = Resolution::default();
        for dependent in self.store.list_dependents(task_id).await? {
            if dependent.status != TaskStatus::Blocked {
                continue;
            }
            match self.readiness(&dependent).await? {
                Readiness::Ready => {
                    if self.release(&dependent).await? {
                        resolution.released.push(dependent.id);
                    }
                }
                Readiness::Waiting => {
                    tracing::debug!(
                        task_id = %dependent.id,
                        finished_dependency = %task_id,
                        "Dependent still waiting on other dependencies",
                    );
                }
                Readiness::Broken(dep) => resolution.merge(self.cascade(&dep).await?),
            }
        }
        Ok(resolution)
    }

    /// Fail or cancel every blocked task that transitively depends on
    /// `task`, matching its terminal status.
    pub async fn cascade(&self, task: &Task) -> Result<Resolution, StoreError> {
        let mut resolution = Resolution::default();
        let mut frontier = vec![(task.id, task.status)];

        while let Some((dep_id, dep_status)) = frontier.pop() {
            let update = match dep_status {
                TaskStatus::Failed => StatusUpdate::new(TaskStatus::Failed)
                    .with_error(format!("dependency {dep_id} failed"))
                    .with_message("Dependency failed"),
                TaskStatus::Cancelled => StatusUpdate::new(TaskStatus::Cancelled)
                    .with_message(format!("dependency {dep_id} cancelled")),
                _ => continue,
            };

            for dependent in self.store.list_dependents(dep_id).await? {
                if dependent.status != TaskStatus::Blocked {
                    continue;
                }
                if let Some(updated) = self.writer.write(dependent.id, update.clone()).await? {
                    tracing::info!(
                        task_id = %updated.id,
                        dependency = %dep_id,
                        status = %updated.status,
                        "Dependent ended with its dependency",
                    );
                    resolution.cascaded.push(updated.id);
                    frontier.push((updated.id, updated.status));
                }
            }
        }
        Ok(resolution)
    }

    /// Re-examine every blocked task. Covers a crash between a finish write
    /// and the release that should have followed it.
    pub async fn sweep(&self) -> Result<Resolution, StoreError> {
        let mut resolution = Resolution::default();
        for task in self.store.list_by_status(TaskStatus::Blocked).await? {
            resolution.merge(self.resolve(&task).await?);
        }
        if !resolution.is_empty() {
            tracing::info!(
                released = resolution.released.len(),
                cascaded = resolution.cascaded.len(),
                "Dependency sweep moved tasks",
            );
        }
        Ok(resolution)
    }

    /// Settle one blocked task against the current state of its
    /// dependencies: release it, cascade a broken dependency, or leave it.
    pub async fn resolve(&self, task: &Task) -> Result<Resolution, StoreError> {
        let mut resolution = Resolution::default();
        if task.status != TaskStatus::Blocked {
            return Ok(resolution);
        }
        match self.readiness(task).await? {
            Readiness::Ready => {
                if self.release(task).await? {
                    resolution.released.push(task.id);
                }
            }
            Readiness::Waiting => {}
            Readiness::Broken(dep) => resolution.merge(self.cascade(&dep).await?),
        }
        Ok(resolution)
    }

    async fn readiness(&self, task: &Task) -> Result<Readiness, StoreError> {
        let deps = self.store.get_tasks(&task.depends_on).await?;
        if let Some(broken) = deps
            .iter()
            .find(|d| matches!(d.status, TaskStatus::Failed | TaskStatus::Cancelled))
        {
            return Ok(Readiness::Broken(broken.clone()));
        }
        if deps.len() < task.depends_on.len() {
            tracing::warn!(
                task_id = %task.id,
                expected = task.depends_on.len(),
                found = deps.len(),
                "Blocked task references missing dependencies",
            );
            return Ok(Readiness::Waiting);
        }
        if deps.iter().all(|d| d.status == TaskStatus::Finished) {
            Ok(Readiness::Ready)
        } else {
            Ok(Readiness::Waiting)
        }
    }

    /// Move `task` to `pending` and enqueue it. Returns `false` when another
    /// caller released it first.
    async fn release(&self, task: &Task) -> Result<bool, StoreError> {
        if !self.store.release_if_blocked(task.id).await? {
            return Ok(false);
        }
        let released = self.store.get_task(task.id).await?;
        self.writer.announce(&released);

        match self.queue.enqueue(task.id) {
            Ok(()) => tracing::info!(task_id = %task.id, task_type = %task.task_type, "Task released"),
            Err(QueueError::AlreadyQueued(_)) => {
                tracing::debug!(task_id = %task.id, "Released task was already queued");
            }
            Err(e) => {
                tracing::warn!(task_id = %task.id, error = %e, "Released task could not be enqueued");
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use storyreel_core::task::{NewTask, TaskType};
    use storyreel_core::types::new_id;
    use storyreel_db::{MemoryStore, TaskStore};
    use storyreel_events::EventBus;

    use super::*;

    struct Fixture {
        store: Arc<MemoryStore>,
        queue: Arc<TaskQueue>,
        resolver: DependencyResolver,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(TaskQueue::default());
        let writer = StatusWriter::new(store.clone(), Arc::new(EventBus::default()));
        let resolver = DependencyResolver::new(store.clone(), queue.clone(), writer);
        Fixture {
            store,
            queue,
            resolver,
        }
    }

    fn task(deps: &[EntityId]) -> Task {
        NewTask::new(TaskType::ShotImage, new_id())
            .depends_on(deps.iter().copied())
            .into_task(new_id(), Utc::now())
    }

    async fn end(store: &MemoryStore, id: EntityId, status: TaskStatus) -> Task {
        let current = store.get_task(id).await.unwrap();
        if current.status == TaskStatus::Pending && status != TaskStatus::Cancelled {
            store
                .update_status(id, &StatusUpdate::new(TaskStatus::Processing))
                .await
                .unwrap();
        }
        store.update_status(id, &StatusUpdate::new(status)).await.unwrap()
    }

    #[tokio::test]
    async fn releases_only_when_every_dependency_finished() {
        let f = fixture();
        let a = task(&[]);
        let b = task(&[]);
        let dependent = task(&[a.id, b.id]);
        f.store
            .insert_tasks(&[a.clone(), b.clone(), dependent.clone()])
            .await
            .unwrap();

        let a = end(&f.store, a.id, TaskStatus::Finished).await;
        let first = f.resolver.on_terminal(&a).await.unwrap();
        assert!(first.released.is_empty());
        assert_eq!(f.store.get_task(dependent.id).await.unwrap().status, TaskStatus::Blocked);
        assert!(!f.queue.contains(dependent.id));

        let b = end(&f.store, b.id, TaskStatus::Finished).await;
        let second = f.resolver.on_terminal(&b).await.unwrap();
        assert_eq!(second.released, vec![dependent.id]);
        assert_eq!(f.store.get_task(dependent.id).await.unwrap().status, TaskStatus::Pending);
        assert!(f.queue.contains(dependent.id));
    }

    #[tokio::test]
    async fn repeated_finish_events_enqueue_once() {
        let f = fixture();
        let dep = task(&[]);
        let dependent = task(&[dep.id]);
        f.store.insert_tasks(&[dep.clone(), dependent.clone()]).await.unwrap();
        end(&f.store, dep.id, TaskStatus::Finished).await;

        let (a, b) = tokio::join!(f.resolver.on_finished(dep.id), f.resolver.on_finished(dep.id));
        let released = a.unwrap().released.len() + b.unwrap().released.len();
        assert_eq!(released, 1);
        assert_eq!(f.queue.stats().pending, 1);
    }

    #[tokio::test]
    async fn failure_cascades_transitively() {
        let f = fixture();
        let root = task(&[]);
        let child = task(&[root.id]);
        let grandchild = task(&[child.id]);
        f.store
            .insert_tasks(&[root.clone(), child.clone(), grandchild.clone()])
            .await
            .unwrap();

        let root = end(&f.store, root.id, TaskStatus::Failed).await;
        let resolution = f.resolver.on_terminal(&root).await.unwrap();
        assert_eq!(resolution.cascaded.len(), 2);

        let child = f.store.get_task(child.id).await.unwrap();
        assert_eq!(child.status, TaskStatus::Failed);
        assert_eq!(child.error, format!("dependency {} failed", root.id));
        let grandchild = f.store.get_task(grandchild.id).await.unwrap();
        assert_eq!(grandchild.error, format!("dependency {} failed", child.id));
    }

    #[tokio::test]
    async fn cancellation_cascades_as_cancellation() {
        let f = fixture();
        let root = task(&[]);
        let child = task(&[root.id]);
        f.store.insert_tasks(&[root.clone(), child.clone()]).await.unwrap();

        let root = end(&f.store, root.id, TaskStatus::Cancelled).await;
        f.resolver.on_terminal(&root).await.unwrap();
        assert_eq!(f.store.get_task(child.id).await.unwrap().status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn sweep_releases_and_cascades_missed_events() {
        let f = fixture();
        let done = task(&[]);
        let failed = task(&[]);
        let ready = task(&[done.id]);
        let stranded = task(&[done.id, failed.id]);
        let waiting = task(&[new_id()]);
        f.store
            .insert_tasks(&[
                done.clone(),
                failed.clone(),
                ready.clone(),
                stranded.clone(),
                waiting.clone(),
            ])
            .await
            .unwrap();
        end(&f.store, done.id, TaskStatus::Finished).await;
        end(&f.store, failed.id, TaskStatus::Failed).await;

        let resolution = f.resolver.sweep().await.unwrap();
        assert_eq!(resolution.released, vec![ready.id]);
        assert_eq!(resolution.cascaded, vec![stranded.id]);
        assert_eq!(f.store.get_task(waiting.id).await.unwrap().status, TaskStatus::Blocked);

        assert!(f.resolver.sweep().await.unwrap().is_empty());
    }
}
