//! The queue itself: a FIFO of ready task ids plus bookkeeping for ids that
//! are being handled, waiting out a retry delay, or recently finished.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use storyreel_core::types::{EntityId, Timestamp};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::QueueError;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Default number of redeliveries after the first attempt.
pub const DEFAULT_MAX_RETRY: u32 = 3;

/// Default per-attempt handler timeout: 20 minutes.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Default retention of finished outcomes: 24 hours.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 3600);

/// Default base delay before a retry; multiplied by the attempt number.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Per-task delivery options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// Redeliveries allowed after the first attempt.
    pub max_retry: u32,
    /// Upper bound on one handler attempt.
    pub timeout: Duration,
    /// How long the outcome stays queryable after the task leaves the queue.
    pub retention: Duration,
    /// Base delay before a retry.
    pub retry_delay: Duration,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            max_retry: DEFAULT_MAX_RETRY,
            timeout: DEFAULT_TIMEOUT,
            retention: DEFAULT_RETENTION,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

// ---------------------------------------------------------------------------
// Items and outcomes
// ---------------------------------------------------------------------------

/// One delivery of a task id.
#[derive(Debug, Clone)]
pub(crate) struct QueuedItem {
    pub task_id: EntityId,
    /// Attempts already made.
    pub retried: u32,
    pub options: EnqueueOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeState {
    /// The handler succeeded.
    Completed,
    /// The handler gave up, or retries ran out.
    Archived,
}

/// What happened to a task id once it left the queue.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task_id: EntityId,
    pub state: OutcomeState,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub finished_at: Timestamp,
    expires_at: Instant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Ready and waiting for a consumer.
    pub pending: usize,
    /// Being handled right now.
    pub active: usize,
    /// Waiting out a retry delay.
    pub scheduled: usize,
    /// Retained outcomes.
    pub finished: usize,
}

#[derive(Default)]
struct Inner {
    ready: VecDeque<QueuedItem>,
    /// Every id that is ready, active or scheduled.
    tracked: HashSet<EntityId>,
    active: usize,
    scheduled: usize,
    outcomes: HashMap<EntityId, TaskOutcome>,
}

impl Inner {
    fn prune(&mut self, now: Instant) {
        self.outcomes.retain(|_, o| o.expires_at > now);
    }
}

// ---------------------------------------------------------------------------
// TaskQueue
// ---------------------------------------------------------------------------

/// In-process queue of task ids.
pub struct TaskQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    defaults: EnqueueOptions,
    closed: AtomicBool,
}

impl TaskQueue {
    pub fn new(defaults: EnqueueOptions) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            defaults,
            closed: AtomicBool::new(false),
        }
    }

    pub fn defaults(&self) -> EnqueueOptions {
        self.defaults
    }

    /// Enqueue with the queue's default options.
    pub fn enqueue(&self, task_id: EntityId) -> Result<(), QueueError> {
        self.enqueue_with(task_id, self.defaults)
    }

    /// Enqueue a task id. An id that is already ready, active or waiting to
    /// retry is rejected, so one id is never delivered twice concurrently.
    pub fn enqueue_with(&self, task_id: EntityId, options: EnqueueOptions) -> Result<(), QueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        {
            let mut inner = self.lock();
            if !inner.tracked.insert(task_id) {
                return Err(QueueError::AlreadyQueued(task_id));
            }
            inner.outcomes.remove(&task_id);
            inner.ready.push_back(QueuedItem {
                task_id,
                retried: 0,
                options,
            });
        }
        tracing::debug!(task_id = %task_id, max_retry = options.max_retry, "Task enqueued");
        self.notify.notify_one();
        Ok(())
    }

    /// Whether the id is ready, active or waiting to retry.
    pub fn contains(&self, task_id: EntityId) -> bool {
        self.lock().tracked.contains(&task_id)
    }

    /// Outcome of a task that left the queue within its retention window.
    pub fn outcome(&self, task_id: EntityId) -> Option<TaskOutcome> {
        let mut inner = self.lock();
        inner.prune(Instant::now());
        inner.outcomes.get(&task_id).cloned()
    }

    pub fn stats(&self) -> QueueStats {
        let mut inner = self.lock();
        inner.prune(Instant::now());
        QueueStats {
            pending: inner.ready.len(),
            active: inner.active,
            scheduled: inner.scheduled,
            finished: inner.outcomes.len(),
        }
    }

    /// Reject further enqueues.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    // ---- consumer side ----

    /// Wait for the next ready item and mark it active.
    pub(crate) async fn dequeue(&self) -> QueuedItem {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.lock();
                if let Some(item) = inner.ready.pop_front() {
                    inner.active += 1;
                    return item;
                }
            }
            notified.await;
        }
    }

    pub(crate) fn complete(&self, item: &QueuedItem) {
        self.finish(item, OutcomeState::Completed, None);
    }

    pub(crate) fn archive(&self, item: &QueuedItem, error: String) {
        self.finish(item, OutcomeState::Archived, Some(error));
    }

    /// Drop an active item without recording an outcome (shutdown).
    pub(crate) fn abandon(&self, item: &QueuedItem) {
        let mut inner = self.lock();
        inner.active = inner.active.saturating_sub(1);
        inner.tracked.remove(&item.task_id);
    }

    /// Schedule the next attempt after the retry delay.
    pub(crate) fn retry(self: &Arc<Self>, item: QueuedItem) {
        let delay = item.options.retry_delay * (item.retried + 1);
        {
            let mut inner = self.lock();
            inner.active = inner.active.saturating_sub(1);
            inner.scheduled += 1;
        }

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut inner = queue.lock();
                inner.scheduled = inner.scheduled.saturating_sub(1);
                inner.ready.push_back(QueuedItem {
                    retried: item.retried + 1,
                    ..item
                });
            }
            queue.notify.notify_one();
        });
    }

    fn finish(&self, item: &QueuedItem, state: OutcomeState, last_error: Option<String>) {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.active = inner.active.saturating_sub(1);
        inner.tracked.remove(&item.task_id);
        inner.prune(now);
        inner.outcomes.insert(
            item.task_id,
            TaskOutcome {
                task_id: item.task_id,
                state,
                attempts: item.retried + 1,
                last_error,
                finished_at: Utc::now(),
                expires_at: now + item.options.retention,
            },
        );
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave `Inner` half-updated
        // in a way later calls depend on, so recover from poisoning.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new(EnqueueOptions::default())
    }
}
