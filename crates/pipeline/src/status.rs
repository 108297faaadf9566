//! Status writes with event publication.

use std::sync::Arc;

use storyreel_core::task::{StatusUpdate, Task};
use storyreel_core::types::EntityId;
use storyreel_db::{Store, StoreError};
use storyreel_events::{EventBus, TaskEvent};

/// Writes task status through the store and publishes the resulting
/// snapshot on the event bus.
#[derive(Clone)]
pub struct StatusWriter {
    store: Arc<dyn Store>,
    events: Arc<EventBus>,
}

impl StatusWriter {
    pub fn new(store: Arc<dyn Store>, events: Arc<EventBus>) -> Self {
        Self { store, events }
    }

    /// Apply `update`. Returns `None` when the transition is refused because
    /// another writer already moved the task on (for example an
    /// administrative cancellation), which callers treat as "stop here".
    ///
    /// A result that cannot be encoded is logged and dropped; the status
    /// write goes ahead without it.
    pub async fn write(
        &self,
        task_id: EntityId,
        update: StatusUpdate,
    ) -> Result<Option<Task>, StoreError> {
        let outcome = match self.store.update_status(task_id, &update).await {
            Err(StoreError::Serialization(e)) if update.result.is_some() => {
                tracing::error!(
                    task_id = %task_id,
                    status = %update.status,
                    error = %e,
                    "Could not encode task result, writing status without it",
                );
                let retry = StatusUpdate {
                    result: None,
                    ..update.clone()
                };
                self.store.update_status(task_id, &retry).await
            }
            other => other,
        };

        match outcome {
            Ok(task) => {
                tracing::debug!(task_id = %task_id, status = %task.status, "Task status written");
                self.events.publish(TaskEvent::status(&task));
                Ok(Some(task))
            }
            Err(StoreError::Conflict(reason)) => {
                tracing::info!(
                    task_id = %task_id,
                    status = %update.status,
                    reason = %reason,
                    "Status write skipped",
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Mirror worker progress onto `task` and publish it. An empty message
    /// leaves the stored one alone.
    pub async fn progress(&self, task: &Task, progress: u8, message: &str) -> Result<(), StoreError> {
        let stored_message = (!message.is_empty()).then_some(message);
        self.store.update_progress(task.id, progress, stored_message).await?;
        let shown = stored_message.unwrap_or(task.message.as_str());
        self.events.publish(TaskEvent::progress(task, progress, shown));
        Ok(())
    }

    /// Publish a snapshot for a status change made outside [`write`](Self::write),
    /// such as a dependency release.
    pub fn announce(&self, task: &Task) {
        self.events.publish(TaskEvent::status(task));
    }
}
