//! Queue Consumer: the handler run once per delivered task id.
//!
//! ```text
//! load -> claim (processing) -> dispatch -> store job id -> poll -> route -> finish
//!                                   |                         |
//!                          retry / fail (final)      fail | cancel | time out
//! ```
//!
//! With detached polling the handler returns as soon as the job id is
//! stored and the poll runs in the background on [`InFlightJobs`]. A task
//! delivered again while it already carries a job id resumes polling
//! that job instead of submitting a new one.
//!
//! The poll deadline is absolute: it runs from the task's first claim, so
//! a resumed poll only gets what earlier attempts left of it. When polling
//! holds the consumer slot the poll also ends early enough for the attempt
//! to record the timeout before the queue drops it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use storyreel_core::task::{StatusUpdate, Task, TaskResult, TaskStatus, TaskType};
use storyreel_core::types::EntityId;
use storyreel_db::Store;
use storyreel_genworker::{GenerationWorker, JobStatusResponse};
use storyreel_queue::{Delivery, HandlerError, TaskHandler};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::Dispatcher;
use crate::error::{DispatchError, PipelineError, PollError};
use crate::poll::{Poller, ProgressSink};
use crate::registry::{CancellationRegistry, Registration};
use crate::resolver::DependencyResolver;
use crate::router::ResultRouter;
use crate::status::StatusWriter;
use crate::tracker::InFlightJobs;

/// Time an attached poll leaves its attempt for cancelling the remote job
/// and writing the outcome. At most a tenth of the handler timeout.
const OUTCOME_RESERVE: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct TaskConsumer {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) worker: Arc<dyn GenerationWorker>,
    pub(crate) writer: StatusWriter,
    pub(crate) registry: Arc<CancellationRegistry>,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) poller: Arc<Poller>,
    pub(crate) router: Arc<ResultRouter>,
    pub(crate) resolver: Arc<DependencyResolver>,
    pub(crate) jobs: Arc<InFlightJobs>,
    pub(crate) detach: bool,
    /// Engine shutdown. Stops following jobs without ending their tasks.
    pub(crate) shutdown: CancellationToken,
}

#[async_trait]
impl TaskHandler for TaskConsumer {
    async fn handle(&self, delivery: Delivery) -> Result<(), HandlerError> {
        let reserve = OUTCOME_RESERVE.min(delivery.timeout / 10);
        let attempt_ends = Instant::now().checked_add(delivery.timeout.saturating_sub(reserve));

        let task = match self.store.get_task(delivery.task_id).await {
            Ok(task) => task,
            Err(e) if e.is_not_found() => {
                tracing::warn!(task_id = %delivery.task_id, "Delivered task no longer exists");
                return Err(HandlerError::SkipRetry(e.to_string()));
            }
            Err(e) => return Err(HandlerError::Retry(e.to_string())),
        };

        if task.status.is_terminal() {
            tracing::debug!(task_id = %task.id, status = %task.status, "Task already ended, skipping");
            return Ok(());
        }
        if task.status == TaskStatus::Blocked {
            tracing::warn!(task_id = %task.id, "Blocked task delivered, leaving it to the resolver");
            return Ok(());
        }
        if self.jobs.contains_task(task.id) {
            tracing::debug!(task_id = %task.id, "Task already has a job in flight");
            return Ok(());
        }

        tracing::info!(
            task_id = %task.id,
            task_type = %task.task_type,
            attempt = delivery.attempt(),
            "Processing task",
        );
        self.process(task, delivery, attempt_ends).await
    }
}

impl TaskConsumer {
    async fn process(
        &self,
        task: Task,
        delivery: Delivery,
        attempt_ends: Option<Instant>,
    ) -> Result<(), HandlerError> {
        let claim = StatusUpdate::new(TaskStatus::Processing).with_message("Task started");
        let Some(task) = self.writer.write(task.id, claim).await.map_err(retry)? else {
            return Ok(());
        };

        if task.task_type == TaskType::CreateProject {
            let done = StatusUpdate::new(TaskStatus::Finished).with_message("Project initialized");
            if let Some(task) = self.writer.write(task.id, done).await.map_err(retry)? {
                self.settle_dependents(&task).await;
            }
            return Ok(());
        }

        if let Some(job_id) = task.job_id() {
            let job_id = job_id.to_string();
            tracing::info!(task_id = %task.id, job_id = %job_id, "Resuming poll of submitted job");
            self.run_job(task, job_id, attempt_ends).await;
            return Ok(());
        }

        let job_id = match self.dispatcher.dispatch(&task).await {
            Ok(job_id) => job_id,
            Err(e) => return self.dispatch_failed(&task, delivery, e).await,
        };

        let submitted = StatusUpdate::new(TaskStatus::Processing)
            .with_result(TaskResult::job_reference(job_id.clone()))
            .with_message("Job submitted")
            .with_error("");
        match self.writer.write(task.id, submitted).await {
            Ok(Some(task)) => self.run_job(task, job_id, attempt_ends).await,
            Ok(None) => {
                tracing::info!(task_id = %task.id, job_id = %job_id, "Task ended during dispatch, cancelling job");
                self.cancel_remote(task.id, &job_id).await;
            }
            Err(e) => {
                tracing::error!(task_id = %task.id, job_id = %job_id, error = %e, "Could not store job id, following job anyway");
                self.run_job(task, job_id, attempt_ends).await;
            }
        }
        Ok(())
    }

    async fn dispatch_failed(
        &self,
        task: &Task,
        delivery: Delivery,
        err: DispatchError,
    ) -> Result<(), HandlerError> {
        let error = err.to_string();

        if err.is_transient() && !delivery.is_final_attempt() {
            tracing::warn!(
                task_id = %task.id,
                attempt = delivery.attempt(),
                max_retry = delivery.max_retry,
                error = %error,
                "Dispatch failed, will retry",
            );
            let pending_retry = StatusUpdate::new(TaskStatus::Processing)
                .with_message("Dispatch failed, retrying")
                .with_error(error.clone());
            if let Err(e) = self.writer.write(task.id, pending_retry).await {
                tracing::warn!(task_id = %task.id, error = %e, "Could not record dispatch error");
            }
            return Err(HandlerError::Retry(error));
        }

        tracing::error!(
            task_id = %task.id,
            task_type = %task.task_type,
            error = %error,
            "Dispatch failed",
        );
        let failed = StatusUpdate::new(TaskStatus::Failed)
            .with_message("Dispatch failed")
            .with_error(error.clone());
        if let Some(task) = self.writer.write(task.id, failed).await.map_err(retry)? {
            self.settle_dependents(&task).await;
        }

        if err.is_transient() {
            Err(HandlerError::Retry(error))
        } else {
            Err(HandlerError::SkipRetry(error))
        }
    }

    /// Register a cancellation handle for the job and follow it, either in
    /// the background or on the current consumer slot.
    async fn run_job(&self, task: Task, job_id: String, attempt_ends: Option<Instant>) {
        let budget = self.poll_budget(&task, attempt_ends);
        if !self.jobs.begin(task.id, &job_id, budget) {
            tracing::debug!(task_id = %task.id, job_id = %job_id, "Job already being followed");
            return;
        }

        let token = CancellationToken::new();
        let guard = FollowGuard {
            jobs: self.jobs.clone(),
            job_id: job_id.clone(),
            _registration: self.registry.register(task.id, token.clone()),
        };

        // A cancellation that landed between the claim and the registration
        // found no handle to fire.
        if let Ok(current) = self.store.get_task(task.id).await {
            if current.status.is_terminal() {
                token.cancel();
            }
        }

        let this = self.clone();
        let follow = async move {
            this.follow(task, job_id, token, budget).await;
            drop(guard);
        };
        if self.detach {
            self.jobs.spawn(follow);
        } else {
            follow.await;
        }
    }

    /// What is left of the poll deadline counted from the task's first
    /// claim, capped by the attempt when polling is not detached.
    fn poll_budget(&self, task: &Task, attempt_ends: Option<Instant>) -> Duration {
        let deadline = self.poller.config().deadline;
        let spent = task
            .started_at
            .and_then(|started| (Utc::now() - started).to_std().ok())
            .unwrap_or_default();
        let remaining = deadline.saturating_sub(spent);

        let attempt_left = attempt_ends
            .filter(|_| !self.detach)
            .map(|ends| ends.saturating_duration_since(Instant::now()));
        let budget = match attempt_left {
            Some(left) if left < remaining => left,
            _ => remaining,
        };

        if spent.as_secs() > 0 || budget < remaining {
            tracing::debug!(
                task_id = %task.id,
                budget_secs = budget.as_secs(),
                spent_secs = spent.as_secs(),
                "Poll deadline shortened",
            );
        }
        budget
    }

    async fn follow(&self, task: Task, job_id: String, token: CancellationToken, budget: Duration) {
        let sink = TaskProgress {
            writer: self.writer.clone(),
            task: task.clone(),
            token: token.clone(),
        };
        let polled = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                tracing::info!(task_id = %task.id, job_id = %job_id, "Shutting down, job left to resume");
                return;
            }
            polled = self.poller.poll_within(&job_id, budget, &token, &sink) => polled,
        };

        let update = match polled {
            Ok(result) => {
                if self.ended_elsewhere(task.id, &token).await {
                    tracing::info!(task_id = %task.id, job_id = %job_id, "Task ended while its job finished, result dropped");
                    return;
                }
                self.route(&task, result).await
            }
            Err(PollError::Cancelled { .. }) => {
                self.cancel_remote(task.id, &job_id).await;
                StatusUpdate::new(TaskStatus::Cancelled).with_message("Task cancelled")
            }
            Err(PollError::WorkerFailure { error, .. }) => StatusUpdate::new(TaskStatus::Failed)
                .with_message(format!("Job failed: {error}"))
                .with_error(error),
            Err(e @ PollError::Timeout { .. }) => {
                self.cancel_remote(task.id, &job_id).await;
                StatusUpdate::new(TaskStatus::Failed)
                    .with_message("Job timed out")
                    .with_error(e.to_string())
            }
        };

        match self.writer.write(task.id, update).await {
            Ok(Some(task)) => {
                tracing::info!(task_id = %task.id, job_id = %job_id, status = %task.status, "Task ended");
                self.settle_dependents(&task).await;
            }
            Ok(None) => {}
            Err(e) if e.is_not_found() => {
                tracing::warn!(task_id = %task.id, job_id = %job_id, "Task removed while its job was running, outcome dropped");
            }
            Err(e) => {
                tracing::error!(task_id = %task.id, job_id = %job_id, error = %e, "Could not record task outcome");
            }
        }
    }

    /// Whether the task was cancelled or removed after its job was
    /// submitted. Routing such a task would create shots or release
    /// dependents that the cancellation is tearing down.
    async fn ended_elsewhere(&self, task_id: EntityId, token: &CancellationToken) -> bool {
        if token.is_cancelled() {
            return true;
        }
        match self.store.get_task(task_id).await {
            Ok(current) => current.status.is_terminal(),
            Err(e) => e.is_not_found(),
        }
    }

    /// Apply the job's result. Routing failures fail the task with the
    /// worker's locator kept for diagnosis.
    async fn route(&self, task: &Task, result: TaskResult) -> StatusUpdate {
        match self.router.route(task, &result).await {
            Ok(routed) => StatusUpdate::new(TaskStatus::Finished)
                .with_result(routed.locator(&result))
                .with_message("Task completed"),
            Err(e) => {
                let err = PipelineError::from(e);
                tracing::warn!(task_id = %task.id, error = %err, "Result routing failed");
                StatusUpdate::new(TaskStatus::Failed)
                    .with_result(result)
                    .with_message("Result handling failed")
                    .with_error(err.to_string())
            }
        }
    }

    async fn settle_dependents(&self, task: &Task) {
        if let Err(e) = self.resolver.on_terminal(task).await {
            tracing::error!(task_id = %task.id, error = %e, "Could not settle dependent tasks");
        }
    }

    async fn cancel_remote(&self, task_id: EntityId, job_id: &str) {
        match self.worker.cancel_job(job_id).await {
            Ok(()) => tracing::info!(task_id = %task_id, job_id, "Remote job cancelled"),
            Err(e) => tracing::warn!(task_id = %task_id, job_id, error = %e, "Remote job cancel failed"),
        }
    }
}

fn retry(err: storyreel_db::StoreError) -> HandlerError {
    HandlerError::Retry(err.to_string())
}

/// Ends the in-flight entry and the registration when following stops,
/// including when the future is dropped by a handler timeout.
struct FollowGuard {
    jobs: Arc<InFlightJobs>,
    job_id: String,
    _registration: Registration,
}

impl Drop for FollowGuard {
    fn drop(&mut self) {
        self.jobs.end(&self.job_id);
    }
}

/// Mirrors job progress onto the task. A task that no longer exists stops
/// the poll through `token`.
struct TaskProgress {
    writer: StatusWriter,
    task: Task,
    token: CancellationToken,
}

#[async_trait]
impl ProgressSink for TaskProgress {
    async fn report(&self, job: &JobStatusResponse) {
        match self.writer.progress(&self.task, job.progress, &job.message).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::warn!(task_id = %self.task.id, job_id = %job.id, "Task removed while its job was running, stopping poll");
                self.token.cancel();
            }
            Err(e) => {
                tracing::warn!(task_id = %self.task.id, error = %e, "Could not mirror job progress");
            }
        }
    }
}
