//! Result Router: apply a finished job's output to the owning records.
//!
//! | Task type | Side effect |
//! |---|---|
//! | storyboard | parse the shot list, create shots, bind them to the blocked shot-image tasks |
//! | shot image / regenerate | store `shots/{id}/image.png`, set the shot image |
//! | project audio | store `shots/{id}/audio.mp3`, set the shot audio |
//! | video | store `shots/{id}/video.mp4`, set the shot video |

use std::sync::Arc;

use storyreel_cloud::StorageProvider;
use storyreel_core::naming::{content_type_for_key, shot_audio_key, shot_image_key, shot_video_key};
use storyreel_core::shot::{Shot, ShotAsset};
use storyreel_core::storyboard::parse_storyboard;
use storyreel_core::task::{ShotParams, Task, TaskParams, TaskResult, TaskStatus, TaskType};
use storyreel_core::types::EntityId;
use storyreel_db::Store;
use storyreel_genworker::ArtifactFetcher;

use crate::error::RouteError;

/// What a routed result produced.
#[derive(Debug, Clone)]
pub enum Routed {
    /// Shots created from a storyboard, and the tasks they were bound to.
    Storyboard {
        shots: Vec<Shot>,
        bound_tasks: Vec<EntityId>,
    },
    /// An asset stored and attached to a shot.
    Asset { shot: Shot, url: String },
    /// Nothing to route.
    Nothing,
}

impl Routed {
    /// Result locator to store on the finished task: the worker's locator
    /// with the URL swapped for the durable one when an asset was stored.
    pub fn locator(&self, worker: &TaskResult) -> TaskResult {
        match self {
            Self::Asset { url, .. } => TaskResult {
                resource_url: url.clone(),
                ..worker.clone()
            },
            _ => worker.clone(),
        }
    }
}

pub struct ResultRouter {
    store: Arc<dyn Store>,
    fetcher: Arc<dyn ArtifactFetcher>,
    storage: Arc<dyn StorageProvider>,
}

impl ResultRouter {
    pub fn new(
        store: Arc<dyn Store>,
        fetcher: Arc<dyn ArtifactFetcher>,
        storage: Arc<dyn StorageProvider>,
    ) -> Self {
        Self {
            store,
            fetcher,
            storage,
        }
    }

    pub async fn route(&self, task: &Task, result: &TaskResult) -> Result<Routed, RouteError> {
        if task.task_type == TaskType::CreateProject {
            return Ok(Routed::Nothing);
        }
        if result.resource_url.trim().is_empty() {
            return Err(RouteError::MissingUrl);
        }

        match task.task_type {
            TaskType::CreateProject => Ok(Routed::Nothing),
            TaskType::Storyboard => self.storyboard(task, result).await,
            TaskType::ShotImage | TaskType::RegenerateShot => {
                self.asset(task, result, ShotAsset::Image, shot_image_key).await
            }
            TaskType::ProjectAudio => {
                self.asset(task, result, ShotAsset::Audio, shot_audio_key).await
            }
            TaskType::VideoGen => self.asset(task, result, ShotAsset::Video, shot_video_key).await,
        }
    }

    // ---- branches ----

    async fn storyboard(&self, task: &Task, result: &TaskResult) -> Result<Routed, RouteError> {
        let body = self.fetcher.fetch(&result.resource_url).await?.into_bytes().await?;
        let entries = parse_storyboard(&body).map_err(RouteError::Storyboard)?;
        let shots = self.store.create_shots(task.project_id, entries).await?;
        tracing::info!(
            task_id = %task.id,
            project_id = %task.project_id,
            shots = shots.len(),
            "Storyboard expanded into shots",
        );

        let bound_tasks = self.bind_shots(task, &shots).await?;
        Ok(Routed::Storyboard { shots, bound_tasks })
    }

    /// Bind shots, in storyboard order, to the storyboard's dependent
    /// shot-image tasks that have no shot yet.
    async fn bind_shots(&self, storyboard: &Task, shots: &[Shot]) -> Result<Vec<EntityId>, RouteError> {
        let unbound = self
            .store
            .list_dependents(storyboard.id)
            .await?
            .into_iter()
            .filter(|t| {
                t.task_type == TaskType::ShotImage
                    && t.status == TaskStatus::Blocked
                    && t.target_shot().is_none()
            });

        let mut bound = Vec::new();
        for (task, shot) in unbound.zip(shots) {
            let base = match &task.parameters {
                Some(TaskParams::Shot(p)) => p.clone(),
                _ => ShotParams::default(),
            };
            let params = TaskParams::Shot(ShotParams {
                shot_id: Some(shot.id),
                prompt: shot.prompt.clone(),
                transition: shot.transition.clone(),
                ..base
            });
            self.store.bind_shot(task.id, shot.id, &params).await?;
            tracing::debug!(task_id = %task.id, shot_id = %shot.id, order = shot.order, "Shot bound to task");
            bound.push(task.id);
        }

        if bound.len() < shots.len() {
            tracing::info!(
                task_id = %storyboard.id,
                shots = shots.len(),
                bound = bound.len(),
                "More shots than waiting shot tasks",
            );
        }
        Ok(bound)
    }

    async fn asset(
        &self,
        task: &Task,
        result: &TaskResult,
        asset: ShotAsset,
        key_for: fn(EntityId) -> String,
    ) -> Result<Routed, RouteError> {
        let shot_id = task
            .target_shot()
            .ok_or(RouteError::NoTargetShot(task.task_type))?;
        let key = key_for(shot_id);
        let url = self.persist(&result.resource_url, &key).await?;
        let shot = self.store.set_shot_asset(shot_id, asset, &url).await?;
        tracing::info!(task_id = %task.id, shot_id = %shot_id, key = %key, "Artifact stored");
        Ok(Routed::Asset { shot, url })
    }

    /// Fetch `source_url` and stream it into storage under `key`. Returns
    /// the storage-backed, time-limited URL.
    async fn persist(&self, source_url: &str, key: &str) -> Result<String, RouteError> {
        let artifact = self.fetcher.fetch(source_url).await?;
        let url = self
            .storage
            .upload_stream(artifact.body, key, artifact.size, content_type_for_key(key))
            .await?;
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Utc;
    use storyreel_cloud::MemoryStorageProvider;
    use storyreel_core::shot::{NewShot, ShotStatus};
    use storyreel_core::task::{NewTask, StoryboardParams};
    use storyreel_core::types::new_id;
    use storyreel_db::{MemoryStore, ShotStore, TaskStore};
    use storyreel_genworker::FetchError;

    use super::*;
    use crate::testing::MemoryFetcher;

    struct Fixture {
        store: Arc<MemoryStore>,
        fetcher: Arc<MemoryFetcher>,
        storage: Arc<MemoryStorageProvider>,
        router: ResultRouter,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(MemoryFetcher::new());
        let storage = Arc::new(MemoryStorageProvider::new());
        let router = ResultRouter::new(store.clone(), fetcher.clone(), storage.clone());
        Fixture {
            store,
            fetcher,
            storage,
            router,
        }
    }

    fn locator(url: &str) -> TaskResult {
        TaskResult {
            resource_type: "file".into(),
            resource_id: "r1".into(),
            resource_url: url.into(),
        }
    }

    async fn shot(store: &MemoryStore, project_id: EntityId) -> Shot {
        store
            .create_shots(
                project_id,
                vec![NewShot {
                    order: 1,
                    title: "t".into(),
                    description: String::new(),
                    prompt: "p".into(),
                    transition: String::new(),
                }],
            )
            .await
            .unwrap()
            .remove(0)
    }

    #[tokio::test]
    async fn storyboard_creates_and_binds_shots() {
        let f = fixture();
        let project_id = new_id();
        let now = Utc::now();
        let storyboard = NewTask::new(TaskType::Storyboard, project_id)
            .with_params(TaskParams::Storyboard(StoryboardParams::default()))
            .into_task(new_id(), now);
        let shot_tasks: Vec<Task> = (0..2)
            .map(|_| {
                NewTask::new(TaskType::ShotImage, project_id)
                    .with_params(TaskParams::Shot(ShotParams {
                        style: "ink".into(),
                        ..Default::default()
                    }))
                    .depends_on([storyboard.id])
                    .into_task(new_id(), now)
            })
            .collect();
        f.store.insert_tasks(&[storyboard.clone()]).await.unwrap();
        f.store.insert_tasks(&shot_tasks).await.unwrap();
        f.fetcher.insert(
            "http://w/sb.json",
            r#"{"shots":[{"title":"A","prompt":"pa"},{"title":"B","prompt":"pb","order":5}]}"#,
        );

        let routed = f
            .router
            .route(&storyboard, &locator("http://w/sb.json"))
            .await
            .unwrap();

        let (shots, bound) = assert_matches!(routed, Routed::Storyboard { shots, bound_tasks } => (shots, bound_tasks));
        assert_eq!(shots.iter().map(|s| s.order).collect::<Vec<_>>(), vec![1, 5]);
        assert_eq!(bound, vec![shot_tasks[0].id, shot_tasks[1].id]);

        let first = f.store.get_task(shot_tasks[0].id).await.unwrap();
        assert_eq!(first.target_shot(), Some(shots[0].id));
        assert_matches!(first.parameters, Some(TaskParams::Shot(ref p)) => {
            assert_eq!(p.prompt, "pa");
            assert_eq!(p.style, "ink");
        });
    }

    #[tokio::test]
    async fn empty_storyboard_is_rejected() {
        let f = fixture();
        let storyboard = NewTask::new(TaskType::Storyboard, new_id()).into_task(new_id(), Utc::now());
        f.fetcher.insert("http://w/empty.json", r#"{"shots":[]}"#);

        let err = f
            .router
            .route(&storyboard, &locator("http://w/empty.json"))
            .await
            .unwrap_err();
        assert_matches!(err, RouteError::Storyboard(_));
        assert!(!err.is_persist());
    }

    #[tokio::test]
    async fn image_is_stored_under_shot_key() {
        let f = fixture();
        let project_id = new_id();
        let s = shot(&f.store, project_id).await;
        let task = NewTask::new(TaskType::RegenerateShot, project_id)
            .with_shot(s.id)
            .into_task(new_id(), Utc::now());
        f.fetcher.insert("http://w/img", b"PNG".to_vec());

        let routed = f.router.route(&task, &locator("http://w/img")).await.unwrap();
        let key = format!("shots/{}/image.png", s.id);
        assert_matches!(routed, Routed::Asset { ref shot, ref url } => {
            assert_eq!(url, &format!("memory://{key}"));
            assert_eq!(shot.status, ShotStatus::Completed);
        });
        assert_eq!(routed.locator(&locator("http://w/img")).resource_url, format!("memory://{key}"));

        let stored = f.storage.get(&key).await.unwrap();
        assert_eq!(stored.bytes, b"PNG");
        assert_eq!(stored.content_type, "image/png");
    }

    #[tokio::test]
    async fn audio_keeps_shot_status_and_video_completes_it() {
        let f = fixture();
        let project_id = new_id();
        let s = shot(&f.store, project_id).await;
        f.fetcher.insert("http://w/a", b"ID3".to_vec());
        f.fetcher.insert("http://w/v", b"MP4".to_vec());

        let audio = NewTask::new(TaskType::ProjectAudio, project_id)
            .with_shot(s.id)
            .into_task(new_id(), Utc::now());
        f.router.route(&audio, &locator("http://w/a")).await.unwrap();
        let after_audio = f.store.get_shot(s.id).await.unwrap();
        assert_eq!(after_audio.status, ShotStatus::Pending);
        assert!(after_audio.audio_url.is_some());
        assert_eq!(
            f.storage.get(&format!("shots/{}/audio.mp3", s.id)).await.unwrap().content_type,
            "audio/mpeg"
        );

        let video = NewTask::new(TaskType::VideoGen, project_id)
            .with_shot(s.id)
            .into_task(new_id(), Utc::now());
        f.router.route(&video, &locator("http://w/v")).await.unwrap();
        let after_video = f.store.get_shot(s.id).await.unwrap();
        assert_eq!(after_video.status, ShotStatus::Completed);
        assert!(after_video.video_url.is_some());
    }

    #[tokio::test]
    async fn empty_url_and_failed_download_are_errors() {
        let f = fixture();
        let task = NewTask::new(TaskType::ShotImage, new_id())
            .with_shot(new_id())
            .into_task(new_id(), Utc::now());

        assert_matches!(
            f.router.route(&task, &locator("")).await,
            Err(RouteError::MissingUrl)
        );
        let err = f
            .router
            .route(&task, &locator("http://w/missing"))
            .await
            .unwrap_err();
        assert_matches!(err, RouteError::Fetch(FetchError::Status(404)));
        assert!(err.is_persist());
    }
}
