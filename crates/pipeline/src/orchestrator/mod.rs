//! The engine facade.
//!
//! [`Orchestrator`] owns every piece of shared engine state (queue,
//! cancellation registry, in-flight jobs) for its own lifetime and wires
//! the consumer pipeline together. It is the only type the HTTP layer talks
//! to.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use storyreel_cloud::StorageProvider;
use storyreel_core::planning::{plan_project, ProjectDefaults, ProjectPlan};
use storyreel_core::task::{NewTask, StatusUpdate, Task, TaskStatus};
use storyreel_core::types::{new_id, EntityId};
use storyreel_db::Store;
use storyreel_events::EventBus;
use storyreel_genworker::{ArtifactFetcher, GenerationWorker};
use storyreel_queue::{ConsumerPool, QueueError, TaskQueue};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::consumer::TaskConsumer;
use crate::dispatcher::Dispatcher;
use crate::error::PipelineError;
use crate::poll::Poller;
use crate::registry::CancellationRegistry;
use crate::resolver::{DependencyResolver, Resolution};
use crate::router::ResultRouter;
use crate::status::StatusWriter;
use crate::tracker::InFlightJobs;

#[cfg(test)]
mod tests;

/// Message written on administratively cancelled tasks when no reason is
/// given.
pub const DEFAULT_CANCEL_REASON: &str = "cancelled by administrator";

/// Collaborators the engine is built on.
pub struct EngineDeps {
    pub store: Arc<dyn Store>,
    pub worker: Arc<dyn GenerationWorker>,
    pub fetcher: Arc<dyn ArtifactFetcher>,
    pub storage: Arc<dyn StorageProvider>,
    pub events: Arc<EventBus>,
}

/// What [`Orchestrator::recover`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Pending and processing tasks put back on the queue.
    pub requeued: usize,
    pub released: usize,
    pub cascaded: usize,
}

pub struct Orchestrator {
    config: EngineConfig,
    store: Arc<dyn Store>,
    worker: Arc<dyn GenerationWorker>,
    events: Arc<EventBus>,
    queue: Arc<TaskQueue>,
    registry: Arc<CancellationRegistry>,
    jobs: Arc<InFlightJobs>,
    writer: StatusWriter,
    resolver: Arc<DependencyResolver>,
    consumer: TaskConsumer,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(deps: EngineDeps, config: EngineConfig) -> Self {
        let EngineDeps {
            store,
            worker,
            fetcher,
            storage,
            events,
        } = deps;

        let queue = Arc::new(TaskQueue::new(config.queue));
        let registry = Arc::new(CancellationRegistry::new());
        let jobs = Arc::new(InFlightJobs::new());
        let shutdown = CancellationToken::new();
        let writer = StatusWriter::new(store.clone(), events.clone());
        let resolver = Arc::new(DependencyResolver::new(
            store.clone(),
            queue.clone(),
            writer.clone(),
        ));

        let consumer = TaskConsumer {
            store: store.clone(),
            worker: worker.clone(),
            writer: writer.clone(),
            registry: registry.clone(),
            dispatcher: Arc::new(Dispatcher::new(store.clone(), worker.clone())),
            poller: Arc::new(Poller::new(worker.clone(), config.poll)),
            router: Arc::new(ResultRouter::new(store.clone(), fetcher, storage)),
            resolver: resolver.clone(),
            jobs: jobs.clone(),
            detach: config.detach_polling,
            shutdown: shutdown.clone(),
        };

        Self {
            config,
            store,
            worker,
            events,
            queue,
            registry,
            jobs,
            writer,
            resolver,
            consumer,
            shutdown,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    pub fn registry(&self) -> &Arc<CancellationRegistry> {
        &self.registry
    }

    pub fn jobs(&self) -> &Arc<InFlightJobs> {
        &self.jobs
    }

    pub async fn get_task(&self, id: EntityId) -> Result<Task, PipelineError> {
        Ok(self.store.get_task(id).await?)
    }

    // ---- task creation ----

    /// Validate and store a task. A pending task is enqueued; a blocked one
    /// is settled straight away in case its dependencies already ended.
    pub async fn create_task(&self, input: NewTask) -> Result<Task, PipelineError> {
        input.validate()?;
        let task = input.into_task(new_id(), Utc::now());

        let known = self.store.get_tasks(&task.depends_on).await?;
        if let Some(missing) = task
            .depends_on
            .iter()
            .find(|id| !known.iter().any(|t| t.id == **id))
        {
            return Err(PipelineError::Validation(format!(
                "Unknown dependency task: {missing}"
            )));
        }

        self.store.insert_tasks(std::slice::from_ref(&task)).await?;
        tracing::info!(
            task_id = %task.id,
            task_type = %task.task_type,
            status = %task.status,
            dependencies = task.depends_on.len(),
            "Task created",
        );

        match task.status {
            TaskStatus::Pending => self.enqueue(task.id)?,
            _ => {
                self.resolver.resolve(&task).await?;
            }
        }
        Ok(self.store.get_task(task.id).await?)
    }

    /// Create a project's storyboard task and its blocked shot-image tasks,
    /// then enqueue the storyboard.
    pub async fn plan_project(
        &self,
        project_id: EntityId,
        defaults: &ProjectDefaults,
    ) -> Result<ProjectPlan, PipelineError> {
        let plan = plan_project(project_id, defaults, Utc::now())?;
        self.store.insert_tasks(&plan.clone().into_tasks()).await?;
        self.enqueue(plan.storyboard.id)?;
        tracing::info!(
            project_id = %project_id,
            storyboard_task = %plan.storyboard.id,
            shot_tasks = plan.shot_tasks.len(),
            "Project tasks planned",
        );
        Ok(plan)
    }

    fn enqueue(&self, task_id: EntityId) -> Result<(), PipelineError> {
        match self.queue.enqueue(task_id) {
            Ok(()) | Err(QueueError::AlreadyQueued(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    // ---- administrative cancellation ----

    /// Cancel a task that has not ended. A poll in progress is signalled
    /// through its registry handle and cancels the remote job itself;
    /// otherwise a stored job id is cancelled here. Blocked dependents are
    /// cancelled with it.
    pub async fn cancel_task(
        &self,
        id: EntityId,
        reason: Option<&str>,
    ) -> Result<Task, PipelineError> {
        let task = self.store.get_task(id).await?;
        if task.status.is_terminal() {
            return Err(already_ended(&task));
        }

        let message = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_CANCEL_REASON);
        let update = StatusUpdate::new(TaskStatus::Cancelled).with_message(message);
        let Some(cancelled) = self.writer.write(id, update).await? else {
            let current = self.store.get_task(id).await?;
            return Err(already_ended(&current));
        };

        let signalled = self.registry.cancel(id);
        if !signalled {
            if let Some(job_id) = cancelled.job_id() {
                if let Err(e) = self.worker.cancel_job(job_id).await {
                    tracing::warn!(task_id = %id, job_id, error = %e, "Remote job cancel failed");
                }
            }
        }
        tracing::info!(task_id = %id, reason = %message, signalled, "Task cancelled");

        if let Err(e) = self.resolver.on_terminal(&cancelled).await {
            tracing::error!(task_id = %id, error = %e, "Could not cancel dependent tasks");
        }
        Ok(cancelled)
    }

    /// Cancel every active task of a project. Returns the tasks cancelled
    /// directly; dependents cancelled along the way are skipped.
    pub async fn cancel_project_tasks(
        &self,
        project_id: EntityId,
        reason: Option<&str>,
    ) -> Result<Vec<Task>, PipelineError> {
        let active = self.store.list_active_by_project(project_id).await?;
        self.cancel_all(active, reason).await
    }

    /// Cancel every active task targeting a shot.
    pub async fn cancel_shot_tasks(
        &self,
        shot_id: EntityId,
        reason: Option<&str>,
    ) -> Result<Vec<Task>, PipelineError> {
        let active = self.store.list_active_by_shot(shot_id).await?;
        self.cancel_all(active, reason).await
    }

    async fn cancel_all(
        &self,
        tasks: Vec<Task>,
        reason: Option<&str>,
    ) -> Result<Vec<Task>, PipelineError> {
        let mut cancelled = Vec::with_capacity(tasks.len());
        for task in tasks {
            match self.cancel_task(task.id, reason).await {
                Ok(t) => cancelled.push(t),
                Err(PipelineError::Conflict(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(cancelled)
    }

    // ---- lifecycle ----

    /// Put tasks left pending or processing by a previous run back on the
    /// queue and settle blocked tasks. Processing tasks that carry a job id
    /// resume polling when delivered.
    pub async fn recover(&self) -> Result<RecoveryReport, PipelineError> {
        let mut requeued = 0;
        for status in [TaskStatus::Processing, TaskStatus::Pending] {
            for task in self.store.list_by_status(status).await? {
                if self.jobs.contains_task(task.id) {
                    continue;
                }
                match self.queue.enqueue(task.id) {
                    Ok(()) => requeued += 1,
                    Err(QueueError::AlreadyQueued(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        let Resolution { released, cascaded } = self.resolver.sweep().await?;

        let report = RecoveryReport {
            requeued,
            released: released.len(),
            cascaded: cascaded.len(),
        };
        tracing::info!(
            requeued = report.requeued,
            released = report.released,
            cascaded = report.cascaded,
            "Recovery complete",
        );
        Ok(report)
    }

    /// Start the consumer pool and, when configured, the dependency sweep.
    pub fn start(&self) -> EngineHandle {
        let pool = ConsumerPool::start(
            self.queue.clone(),
            Arc::new(self.consumer.clone()),
            self.config.concurrency,
            self.shutdown.clone(),
        );
        let sweeper = self.config.dependency_sweep.map(|period| {
            tokio::spawn(run_sweeper(
                self.resolver.clone(),
                period,
                self.shutdown.clone(),
            ))
        });
        EngineHandle {
            pool,
            sweeper,
            queue: self.queue.clone(),
            jobs: self.jobs.clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    #[cfg(test)]
    pub(crate) fn consumer(&self) -> &TaskConsumer {
        &self.consumer
    }
}

fn already_ended(task: &Task) -> PipelineError {
    PipelineError::Conflict(format!("Task {} is already {}", task.id, task.status))
}

async fn run_sweeper(resolver: Arc<DependencyResolver>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    tracing::info!(period_secs = period.as_secs(), "Dependency sweep started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Dependency sweep shutting down");
                break;
            }
            _ = ticker.tick() => {
                if let Err(e) = resolver.sweep().await {
                    tracing::error!(error = %e, "Dependency sweep failed");
                }
            }
        }
    }
}

/// Running engine background work.
pub struct EngineHandle {
    pool: ConsumerPool,
    sweeper: Option<JoinHandle<()>>,
    queue: Arc<TaskQueue>,
    jobs: Arc<InFlightJobs>,
    shutdown: CancellationToken,
}

impl EngineHandle {
    /// Stop consuming, stop the sweep and wait for followed jobs to let go.
    /// Jobs still running remotely keep their job id on the task and are
    /// resumed by the next [`Orchestrator::recover`].
    pub async fn shutdown(self) {
        tracing::info!("Engine shutting down");
        self.queue.close();
        self.shutdown.cancel();
        self.pool.join().await;
        if let Some(sweeper) = self.sweeper {
            if let Err(e) = sweeper.await {
                tracing::error!(error = %e, "Dependency sweep terminated abnormally");
            }
        }
        self.jobs.shutdown().await;
        tracing::info!("Engine stopped");
    }
}
