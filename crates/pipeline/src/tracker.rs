//! In-flight jobs: remote jobs currently being followed, keyed by job id.
//!
//! With detached polling each followed job runs as its own lightweight
//! task on a [`TaskTracker`] instead of holding a queue consumer slot for
//! the whole poll. The table also stops a task from being followed twice.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use storyreel_core::types::{EntityId, Timestamp};
use tokio_util::task::TaskTracker;

/// One job being followed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlightJob {
    pub job_id: String,
    pub task_id: EntityId,
    pub started_at: Timestamp,
    pub deadline_at: Timestamp,
}

#[derive(Default)]
pub struct InFlightJobs {
    jobs: Mutex<HashMap<String, InFlightJob>>,
    tasks: TaskTracker,
}

impl InFlightJobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `task_id` is now following `job_id`. Returns `false`
    /// when the task already has a job in flight.
    pub fn begin(&self, task_id: EntityId, job_id: &str, deadline: Duration) -> bool {
        let mut jobs = self.lock();
        if jobs.values().any(|j| j.task_id == task_id) || jobs.contains_key(job_id) {
            return false;
        }
        let now = Utc::now();
        let deadline_at = chrono::Duration::from_std(deadline)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        jobs.insert(
            job_id.to_string(),
            InFlightJob {
                job_id: job_id.to_string(),
                task_id,
                started_at: now,
                deadline_at,
            },
        );
        true
    }

    pub fn end(&self, job_id: &str) {
        self.lock().remove(job_id);
    }

    pub fn contains_task(&self, task_id: EntityId) -> bool {
        self.lock().values().any(|j| j.task_id == task_id)
    }

    pub fn get(&self, job_id: &str) -> Option<InFlightJob> {
        self.lock().get(job_id).cloned()
    }

    /// Snapshot ordered by start time.
    pub fn list(&self) -> Vec<InFlightJob> {
        let mut jobs: Vec<InFlightJob> = self.lock().values().cloned().collect();
        jobs.sort_by_key(|j| j.started_at);
        jobs
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `follow` in the background.
    pub fn spawn<F>(&self, follow: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(follow);
    }

    /// Stop accepting background work and wait for what is running.
    pub async fn shutdown(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, InFlightJob>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
