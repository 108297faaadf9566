use std::sync::Mutex;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use serde_json::Value;
use storyreel_cloud::MemoryStorageProvider;
use storyreel_core::shot::NewShot;
use storyreel_core::task::{ShotParams, TaskParams, TaskResult, TaskType, VideoParams};
use storyreel_db::{MemoryStore, ShotStore, TaskStore};
use storyreel_events::TaskEventKind;
use storyreel_genworker::{JobState, JobStatusResponse, WorkerApiError};
use storyreel_queue::{Delivery, EnqueueOptions, HandlerError, OutcomeState, TaskHandler};

use super::*;
use crate::config::PollConfig;
use crate::testing::{MemoryFetcher, Reply, ScriptedWorker};

struct Harness {
    engine: Orchestrator,
    store: Arc<MemoryStore>,
    worker: Arc<ScriptedWorker>,
    fetcher: Arc<MemoryFetcher>,
    storage: Arc<MemoryStorageProvider>,
}

fn config(detach_polling: bool) -> EngineConfig {
    EngineConfig {
        poll: PollConfig {
            interval: Duration::from_secs(1),
            deadline: Duration::from_secs(120),
        },
        queue: EnqueueOptions {
            retry_delay: Duration::from_millis(100),
            ..EnqueueOptions::default()
        },
        concurrency: 2,
        detach_polling,
        dependency_sweep: None,
        ..EngineConfig::default()
    }
}

fn harness(detach_polling: bool) -> Harness {
    harness_with(config(detach_polling))
}

fn harness_with(config: EngineConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let worker = Arc::new(ScriptedWorker::new());
    let fetcher = Arc::new(MemoryFetcher::new());
    let storage = Arc::new(MemoryStorageProvider::new());
    let engine = Orchestrator::new(
        EngineDeps {
            store: store.clone(),
            worker: worker.clone(),
            fetcher: fetcher.clone(),
            storage: storage.clone(),
            events: Arc::new(EventBus::default()),
        },
        config,
    );
    Harness {
        engine,
        store,
        worker,
        fetcher,
        storage,
    }
}

fn defaults(shot_count: u32) -> ProjectDefaults {
    ProjectDefaults {
        shot_count,
        style: "watercolor".into(),
        story_text: "A fox crosses a frozen river.".into(),
        image_width: 0,
        image_height: 0,
    }
}

fn first_delivery(task_id: EntityId) -> Delivery {
    Delivery {
        task_id,
        retried: 0,
        max_retry: 3,
        timeout: EnqueueOptions::default().timeout,
    }
}

async fn wait_for_status(store: &MemoryStore, id: EntityId, status: TaskStatus) -> Task {
    for _ in 0..600 {
        let task = store.get_task(id).await.unwrap();
        if task.status == status {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("task {id} never reached {status}");
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..600 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("condition never held");
}

async fn shot_with_image(store: &MemoryStore, project_id: EntityId, image: Option<&str>) -> EntityId {
    let shot = store
        .create_shots(
            project_id,
            vec![NewShot {
                order: 1,
                title: "River".into(),
                description: String::new(),
                prompt: "a frozen river".into(),
                transition: String::new(),
            }],
        )
        .await
        .unwrap()
        .remove(0);
    if let Some(url) = image {
        store.update_shot_image(shot.id, url).await.unwrap();
    }
    shot.id
}

fn shot_task(project_id: EntityId, shot_id: EntityId) -> NewTask {
    NewTask::new(TaskType::ShotImage, project_id).with_params(TaskParams::Shot(ShotParams {
        shot_id: Some(shot_id),
        prompt: "a frozen river".into(),
        ..Default::default()
    }))
}

// ---------------------------------------------------------------------------
// Project planning and storyboard expansion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn planning_creates_storyboard_and_blocked_shot_tasks() {
    let h = harness(false);
    let project_id = new_id();

    let plan = h.engine.plan_project(project_id, &defaults(3)).await.unwrap();

    let storyboard = h.store.get_task(plan.storyboard.id).await.unwrap();
    assert_eq!(storyboard.status, TaskStatus::Pending);
    assert_eq!(storyboard.task_type, TaskType::Storyboard);
    assert!(h.engine.queue().contains(storyboard.id));

    assert_eq!(plan.shot_tasks.len(), 3);
    for planned in &plan.shot_tasks {
        let task = h.store.get_task(planned.id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Blocked);
        assert_eq!(task.depends_on, vec![storyboard.id]);
        assert!(!h.engine.queue().contains(task.id));
    }
}

#[tokio::test]
async fn planning_rejects_zero_shots() {
    let h = harness(false);
    let err = h.engine.plan_project(new_id(), &defaults(0)).await.unwrap_err();
    assert_matches!(err, PipelineError::Validation(_));
}

#[tokio::test(start_paused = true)]
async fn finished_storyboard_creates_shots_and_releases_shot_tasks() {
    let h = harness(false);
    let project_id = new_id();
    let plan = h.engine.plan_project(project_id, &defaults(3)).await.unwrap();

    h.worker.script_next(vec![
        Reply::running(40, "drafting"),
        Reply::succeeded("storyboard", "http://worker/out/sb.json"),
    ]);
    h.fetcher.insert(
        "http://worker/out/sb.json",
        r#"{"shots":[
            {"title":"Dawn","prompt":"fox at dawn"},
            {"title":"Ice","prompt":"cracking ice","transition":"fade"},
            {"title":"Shore","prompt":"far shore"}
        ]}"#,
    );

    h.engine
        .consumer()
        .handle(first_delivery(plan.storyboard.id))
        .await
        .unwrap();

    let storyboard = h.store.get_task(plan.storyboard.id).await.unwrap();
    assert_eq!(storyboard.status, TaskStatus::Finished);
    assert_eq!(storyboard.progress, 100);
    assert_eq!(
        storyboard.result.as_ref().map(|r| r.resource_url.as_str()),
        Some("http://worker/out/sb.json")
    );

    let shots = h.store.list_shots(project_id).await.unwrap();
    assert_eq!(shots.iter().map(|s| s.order).collect::<Vec<_>>(), vec![1, 2, 3]);

    for (planned, shot) in plan.shot_tasks.iter().zip(&shots) {
        let task = h.store.get_task(planned.id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.target_shot(), Some(shot.id));
        assert!(h.engine.queue().contains(task.id));
    }
    assert!(h.engine.registry().is_empty());
    assert!(h.engine.jobs().is_empty());
}

// ---------------------------------------------------------------------------
// Failure paths
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn worker_failure_fails_task_without_retry() {
    let h = harness(false);
    let project_id = new_id();
    let shot_id = shot_with_image(&h.store, project_id, None).await;
    let task = h.engine.create_task(shot_task(project_id, shot_id)).await.unwrap();
    h.worker.script_next(vec![Reply::failed("OOM")]);

    let outcome = h.engine.consumer().handle(first_delivery(task.id)).await;
    assert_matches!(outcome, Ok(()));

    let task = h.store.get_task(task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error, "OOM");
    assert_eq!(h.worker.submissions().len(), 1);
}

#[tokio::test]
async fn video_for_shot_without_image_fails_dispatch() {
    let h = harness(false);
    let project_id = new_id();
    let shot_id = shot_with_image(&h.store, project_id, None).await;
    let task = h
        .engine
        .create_task(
            NewTask::new(TaskType::VideoGen, project_id)
                .with_shot(shot_id)
                .with_params(TaskParams::Video(VideoParams::default())),
        )
        .await
        .unwrap();

    let outcome = h.engine.consumer().handle(first_delivery(task.id)).await;
    assert_matches!(outcome, Err(HandlerError::SkipRetry(ref e)) if e == "shot has no image");

    let task = h.store.get_task(task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error, "shot has no image");
    assert!(h.worker.submissions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn transient_dispatch_error_retries_then_fails_on_final_attempt() {
    let h = harness(false);
    let project_id = new_id();
    let shot_id = shot_with_image(&h.store, project_id, None).await;
    let task = h.engine.create_task(shot_task(project_id, shot_id)).await.unwrap();
    h.worker.fail_next_submits(2);

    let first = h.engine.consumer().handle(first_delivery(task.id)).await;
    assert_matches!(first, Err(HandlerError::Retry(_)));
    let after_first = h.store.get_task(task.id).await.unwrap();
    assert_eq!(after_first.status, TaskStatus::Processing);
    assert!(after_first.error.contains("503"));
    assert_eq!(after_first.job_id(), None);

    let last = Delivery {
        retried: 3,
        ..first_delivery(task.id)
    };
    let second = h.engine.consumer().handle(last).await;
    assert_matches!(second, Err(HandlerError::Retry(_)));
    assert_eq!(h.store.get_task(task.id).await.unwrap().status, TaskStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn unusable_result_fails_task_and_keeps_locator() {
    let h = harness(false);
    let project_id = new_id();
    let shot_id = shot_with_image(&h.store, project_id, None).await;
    let task = h.engine.create_task(shot_task(project_id, shot_id)).await.unwrap();
    h.worker
        .script_next(vec![Reply::succeeded("image", "http://worker/out/gone.png")]);

    h.engine.consumer().handle(first_delivery(task.id)).await.unwrap();

    let task = h.store.get_task(task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.starts_with("could not persist result"));
    assert_eq!(
        task.result.map(|r| r.resource_url),
        Some("http://worker/out/gone.png".to_string())
    );
}

#[tokio::test]
async fn missing_task_is_not_retried() {
    let h = harness(false);
    let outcome = h.engine.consumer().handle(first_delivery(new_id())).await;
    assert_matches!(outcome, Err(HandlerError::SkipRetry(_)));
}

#[tokio::test(start_paused = true)]
async fn task_removed_while_polling_stops_follower_without_retry() {
    let h = harness(false);
    let handle = h.engine.start();
    let project_id = new_id();
    let shot_id = shot_with_image(&h.store, project_id, None).await;
    h.worker.script_next(vec![Reply::running(10, "rendering")]);
    let task = h.engine.create_task(shot_task(project_id, shot_id)).await.unwrap();

    let registry = h.engine.registry().clone();
    wait_until(|| registry.contains(task.id)).await;
    assert!(h.store.delete_task(task.id).await);

    let queue = h.engine.queue().clone();
    wait_until(|| queue.outcome(task.id).is_some()).await;
    let outcome = queue.outcome(task.id).unwrap();
    assert_eq!(outcome.state, OutcomeState::Completed);
    assert_eq!(outcome.attempts, 1);
    assert!(!queue.contains(task.id));

    assert!(registry.is_empty());
    assert!(h.engine.jobs().is_empty());
    assert_eq!(h.worker.cancelled_jobs(), vec!["job-1".to_string()]);
    assert_eq!(h.worker.submissions().len(), 1);
    assert!(h.store.get_task(task.id).await.unwrap_err().is_not_found());

    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn cancelling_a_polling_task_stops_the_poll() {
    let h = harness(true);
    let handle = h.engine.start();
    let project_id = new_id();
    let shot_id = shot_with_image(&h.store, project_id, None).await;
    let task = h.engine.create_task(shot_task(project_id, shot_id)).await.unwrap();

    let registry = h.engine.registry().clone();
    wait_until(|| registry.contains(task.id)).await;

    let cancelled = h
        .engine
        .cancel_task(task.id, Some("shot deleted"))
        .await
        .unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert_eq!(cancelled.message, "shot deleted");
    assert!(!registry.contains(task.id));
    assert!(!registry.cancel(task.id));

    let jobs = h.engine.jobs().clone();
    wait_until(|| jobs.is_empty()).await;
    assert_eq!(h.worker.cancelled_jobs(), vec!["job-1".to_string()]);
    assert_eq!(h.store.get_task(task.id).await.unwrap().status, TaskStatus::Cancelled);

    handle.shutdown().await;
}

/// Passes calls through to a [`ScriptedWorker`], but the first time a job
/// reports success it cancels `task` in the store before answering, like a
/// cancel request landing just as the job completes.
struct CancelledOnCompletion {
    inner: Arc<ScriptedWorker>,
    store: Arc<MemoryStore>,
    task: Mutex<Option<EntityId>>,
}

#[async_trait]
impl GenerationWorker for CancelledOnCompletion {
    async fn submit(&self, body: &Value) -> Result<String, WorkerApiError> {
        self.inner.submit(body).await
    }

    async fn job_status(&self, job_id: &str) -> Result<JobStatusResponse, WorkerApiError> {
        let job = self.inner.job_status(job_id).await?;
        if job.state() == JobState::Succeeded {
            let task = self.task.lock().unwrap().take();
            if let Some(id) = task {
                let cancel = StatusUpdate::new(TaskStatus::Cancelled).with_message("project deleted");
                self.store.update_status(id, &cancel).await.unwrap();
            }
        }
        Ok(job)
    }

    async fn cancel_job(&self, job_id: &str) -> Result<(), WorkerApiError> {
        self.inner.cancel_job(job_id).await
    }
}

#[tokio::test(start_paused = true)]
async fn cancel_landing_as_job_completes_skips_result_routing() {
    let h = harness(false);
    let worker = Arc::new(CancelledOnCompletion {
        inner: h.worker.clone(),
        store: h.store.clone(),
        task: Mutex::new(None),
    });
    let engine = Orchestrator::new(
        EngineDeps {
            store: h.store.clone(),
            worker: worker.clone(),
            fetcher: h.fetcher.clone(),
            storage: h.storage.clone(),
            events: Arc::new(EventBus::default()),
        },
        config(false),
    );
    let project_id = new_id();
    let plan = engine.plan_project(project_id, &defaults(2)).await.unwrap();
    *worker.task.lock().unwrap() = Some(plan.storyboard.id);

    h.worker
        .script_next(vec![Reply::succeeded("storyboard", "http://worker/out/sb.json")]);
    h.fetcher.insert(
        "http://worker/out/sb.json",
        r#"{"shots":[{"title":"A","prompt":"a"},{"title":"B","prompt":"b"}]}"#,
    );

    engine
        .consumer()
        .handle(first_delivery(plan.storyboard.id))
        .await
        .unwrap();

    let storyboard = h.store.get_task(plan.storyboard.id).await.unwrap();
    assert_eq!(storyboard.status, TaskStatus::Cancelled);
    assert_eq!(storyboard.message, "project deleted");
    assert!(h.store.list_shots(project_id).await.unwrap().is_empty());
    for planned in &plan.shot_tasks {
        assert_eq!(h.store.get_task(planned.id).await.unwrap().status, TaskStatus::Blocked);
        assert!(!engine.queue().contains(planned.id));
    }
    assert!(h.worker.cancelled_jobs().is_empty());
    assert!(engine.registry().is_empty());
    assert!(engine.jobs().is_empty());
}

#[tokio::test]
async fn cancelling_an_ended_task_is_a_conflict() {
    let h = harness(false);
    let task = h
        .engine
        .create_task(NewTask::new(TaskType::CreateProject, new_id()))
        .await
        .unwrap();
    h.engine.consumer().handle(first_delivery(task.id)).await.unwrap();
    assert_eq!(h.store.get_task(task.id).await.unwrap().status, TaskStatus::Finished);

    let err = h.engine.cancel_task(task.id, None).await.unwrap_err();
    assert_matches!(err, PipelineError::Conflict(_));
}

#[tokio::test]
async fn cancelling_a_project_cascades_to_blocked_tasks() {
    let h = harness(false);
    let project_id = new_id();
    let plan = h.engine.plan_project(project_id, &defaults(2)).await.unwrap();

    let cancelled = h.engine.cancel_project_tasks(project_id, None).await.unwrap();
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].id, plan.storyboard.id);
    assert_eq!(cancelled[0].message, DEFAULT_CANCEL_REASON);

    for planned in &plan.shot_tasks {
        let task = h.store.get_task(planned.id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
    }
    assert!(h.store.list_active_by_project(project_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn cancelling_a_processing_task_without_poll_cancels_remote_job() {
    let h = harness(false);
    let project_id = new_id();
    let shot_id = shot_with_image(&h.store, project_id, None).await;
    let task = h.engine.create_task(shot_task(project_id, shot_id)).await.unwrap();
    h.store
        .update_status(
            task.id,
            &StatusUpdate::new(TaskStatus::Processing)
                .with_result(TaskResult::job_reference("job-42")),
        )
        .await
        .unwrap();

    h.engine.cancel_shot_tasks(shot_id, None).await.unwrap();

    assert_eq!(h.worker.cancelled_jobs(), vec!["job-42".to_string()]);
    assert_eq!(h.store.get_task(task.id).await.unwrap().status, TaskStatus::Cancelled);
}

// ---------------------------------------------------------------------------
// Redelivery, recovery and the running engine
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn redelivered_task_with_job_id_resumes_polling() {
    let h = harness(false);
    let project_id = new_id();
    let shot_id = shot_with_image(&h.store, project_id, None).await;
    let task = h.engine.create_task(shot_task(project_id, shot_id)).await.unwrap();
    h.store
        .update_status(
            task.id,
            &StatusUpdate::new(TaskStatus::Processing)
                .with_result(TaskResult::job_reference("job-7")),
        )
        .await
        .unwrap();
    h.worker
        .script_job("job-7", vec![Reply::succeeded("image", "http://worker/out/7.png")]);
    h.fetcher.insert("http://worker/out/7.png", b"PNG".to_vec());

    h.engine.consumer().handle(first_delivery(task.id)).await.unwrap();

    assert!(h.worker.submissions().is_empty());
    let task = h.store.get_task(task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Finished);
    let shot = h.store.get_shot(shot_id).await.unwrap();
    assert_eq!(shot.image_url, Some(format!("memory://shots/{shot_id}/image.png")));
}

#[tokio::test(start_paused = true)]
async fn resumed_poll_keeps_deadline_from_first_claim() {
    let h = harness(false);
    let project_id = new_id();
    let shot_id = shot_with_image(&h.store, project_id, None).await;
    let task = h.engine.create_task(shot_task(project_id, shot_id)).await.unwrap();
    let claimed_long_ago = StatusUpdate {
        started_at: Some(Utc::now() - chrono::Duration::hours(2)),
        ..StatusUpdate::new(TaskStatus::Processing).with_result(TaskResult::job_reference("job-9"))
    };
    h.store.update_status(task.id, &claimed_long_ago).await.unwrap();

    let started = tokio::time::Instant::now();
    h.engine.consumer().handle(first_delivery(task.id)).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));

    let task = h.store.get_task(task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.message, "Job timed out");
    assert!(task.error.starts_with("polling timed out"));
    assert_eq!(h.worker.cancelled_jobs(), vec!["job-9".to_string()]);
    assert!(h.worker.submissions().is_empty());
    assert_eq!(h.worker.status_calls(), 0);
    assert!(h.engine.jobs().is_empty());
}

#[tokio::test(start_paused = true)]
async fn attached_poll_ends_inside_handler_timeout() {
    let h = harness_with(EngineConfig {
        poll: PollConfig {
            interval: Duration::from_secs(3),
            deadline: Duration::from_secs(1800),
        },
        queue: EnqueueOptions {
            max_retry: 3,
            timeout: Duration::from_secs(1200),
            ..EnqueueOptions::default()
        },
        detach_polling: false,
        ..config(false)
    });
    let handle = h.engine.start();
    let project_id = new_id();
    let shot_id = shot_with_image(&h.store, project_id, None).await;
    let task = h.engine.create_task(shot_task(project_id, shot_id)).await.unwrap();

    // The job never leaves `running`.
    tokio::time::sleep(Duration::from_secs(3 * 3600)).await;

    let task = h.store.get_task(task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.message, "Job timed out");
    let outcome = h.engine.queue().outcome(task.id).unwrap();
    assert_eq!(outcome.state, OutcomeState::Completed);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(h.worker.submissions().len(), 1);
    assert_eq!(h.worker.cancelled_jobs(), vec!["job-1".to_string()]);

    handle.shutdown().await;
}

#[tokio::test]
async fn create_task_checks_dependencies() {
    let h = harness(false);
    let project_id = new_id();

    let err = h
        .engine
        .create_task(NewTask::new(TaskType::CreateProject, project_id).depends_on([new_id()]))
        .await
        .unwrap_err();
    assert_matches!(err, PipelineError::Validation(_));

    let first = h
        .engine
        .create_task(NewTask::new(TaskType::CreateProject, project_id))
        .await
        .unwrap();
    h.engine.consumer().handle(first_delivery(first.id)).await.unwrap();

    let after = h
        .engine
        .create_task(NewTask::new(TaskType::CreateProject, project_id).depends_on([first.id]))
        .await
        .unwrap();
    assert_eq!(after.status, TaskStatus::Pending);
    assert!(h.engine.queue().contains(after.id));
}

#[tokio::test]
async fn recover_requeues_unfinished_work() {
    let h = harness(false);
    let project_id = new_id();
    let plan = h.engine.plan_project(project_id, &defaults(1)).await.unwrap();
    let shot_id = shot_with_image(&h.store, project_id, None).await;
    let task = h.engine.create_task(shot_task(project_id, shot_id)).await.unwrap();
    h.store
        .update_status(task.id, &StatusUpdate::new(TaskStatus::Processing))
        .await
        .unwrap();

    // A fresh engine over the same store, as after a restart.
    let restarted = Orchestrator::new(
        EngineDeps {
            store: h.store.clone(),
            worker: h.worker.clone(),
            fetcher: h.fetcher.clone(),
            storage: h.storage.clone(),
            events: Arc::new(EventBus::default()),
        },
        EngineConfig::default(),
    );
    let report = restarted.recover().await.unwrap();

    assert_eq!(report.requeued, 2);
    assert!(restarted.queue().contains(plan.storyboard.id));
    assert!(restarted.queue().contains(task.id));
    assert_eq!(report.released, 0);
}

#[tokio::test(start_paused = true)]
async fn engine_runs_project_from_storyboard_to_images() {
    let h = harness(true);
    let mut events = h.engine.events().subscribe();
    let handle = h.engine.start();
    let project_id = new_id();
    let plan = h.engine.plan_project(project_id, &defaults(2)).await.unwrap();

    h.worker.script_job(
        "job-1",
        vec![
            Reply::running(30, "writing"),
            Reply::succeeded("storyboard", "http://worker/out/sb.json"),
        ],
    );
    for n in 2..=3 {
        let url = format!("http://worker/out/{n}.png");
        h.worker
            .script_job(&format!("job-{n}"), vec![Reply::succeeded("image", &url)]);
        h.fetcher.insert(&url, format!("PNG{n}").into_bytes());
    }
    h.fetcher.insert(
        "http://worker/out/sb.json",
        r#"{"shots":[{"title":"A","prompt":"a"},{"title":"B","prompt":"b"}]}"#,
    );

    for planned in &plan.shot_tasks {
        wait_for_status(&h.store, planned.id, TaskStatus::Finished).await;
    }

    let shots = h.store.list_shots(project_id).await.unwrap();
    assert_eq!(shots.len(), 2);
    for shot in &shots {
        let key = format!("shots/{}/image.png", shot.id);
        assert_eq!(shot.image_url.as_deref(), Some(format!("memory://{key}").as_str()));
        assert!(h.storage.get(&key).await.is_some());
    }
    assert_eq!(h.store.get_task(plan.storyboard.id).await.unwrap().status, TaskStatus::Finished);

    let mut saw_progress = false;
    while let Ok(event) = events.try_recv() {
        if event.kind == TaskEventKind::Progress && event.task_id == plan.storyboard.id {
            assert_eq!(event.progress, 30);
            saw_progress = true;
        }
    }
    assert!(saw_progress);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_leaves_polled_job_resumable() {
    let h = harness(true);
    let handle = h.engine.start();
    let project_id = new_id();
    let shot_id = shot_with_image(&h.store, project_id, None).await;
    let task = h.engine.create_task(shot_task(project_id, shot_id)).await.unwrap();

    let registry = h.engine.registry().clone();
    wait_until(|| registry.contains(task.id)).await;
    handle.shutdown().await;

    let task = h.store.get_task(task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Processing);
    assert_eq!(task.job_id(), Some("job-1"));
    assert!(h.worker.cancelled_jobs().is_empty());
    assert!(registry.is_empty());
}
