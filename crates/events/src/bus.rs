//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is shared via `Arc<EventBus>` between the orchestration
//! engine, which publishes, and the API, which streams events to clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use storyreel_core::task::{Task, TaskStatus};
use storyreel_core::types::EntityId;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// TaskEvent
// ---------------------------------------------------------------------------

/// What happened to the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventKind {
    /// The task's status was written.
    Status,
    /// The worker reported progress for the running job.
    Progress,
}

/// A change to one task, as seen by subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub kind: TaskEventKind,
    pub task_id: EntityId,
    pub project_id: EntityId,
    pub shot_id: Option<EntityId>,
    pub status: TaskStatus,
    pub progress: u8,
    pub message: String,
    /// Error text for failed tasks; empty otherwise.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl TaskEvent {
    /// Snapshot of a task right after a status write.
    pub fn status(task: &Task) -> Self {
        Self::from_task(TaskEventKind::Status, task)
    }

    /// Snapshot of a task after progress mirroring.
    pub fn progress(task: &Task, progress: u8, message: impl Into<String>) -> Self {
        Self {
            progress,
            message: message.into(),
            ..Self::from_task(TaskEventKind::Progress, task)
        }
    }

    /// Whether no further events will follow for this task.
    pub fn is_terminal(&self) -> bool {
        self.kind == TaskEventKind::Status && self.status.is_terminal()
    }

    fn from_task(kind: TaskEventKind, task: &Task) -> Self {
        Self {
            kind,
            task_id: task.id,
            project_id: task.project_id,
            shot_id: task.target_shot(),
            status: task.status,
            progress: task.progress,
            message: task.message.clone(),
            error: task.error.clone(),
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// When the buffer is full the oldest un-consumed events are dropped and
/// slow receivers observe `RecvError::Lagged`.
pub struct EventBus {
    sender: broadcast::Sender<TaskEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: TaskEvent) {
        tracing::trace!(
            task_id = %event.task_id,
            status = %event.status,
            progress = event.progress,
            "Task event",
        );
        // Ignore the SendError; it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
