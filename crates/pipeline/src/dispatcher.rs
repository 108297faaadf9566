//! Task to worker job submission.
//!
//! The request body is the task snapshot with `parameters` replaced by the
//! selected parameter variant after type-specific defaults are applied.
//! Video jobs also carry the shot's keyframe image URL.

use std::sync::Arc;

use serde::Serialize;
use storyreel_core::task::{
    ShotParams, StoryboardParams, Task, TaskParams, TaskResult, TaskStatus, TaskType, TtsParams,
    VideoParams,
};
use storyreel_core::types::{EntityId, Timestamp};
use storyreel_db::{Store, StoreError};
use storyreel_genworker::GenerationWorker;

use crate::error::DispatchError;

pub const DEFAULT_VIDEO_FPS: u32 = 24;
pub const DEFAULT_VIDEO_RESOLUTION: &str = "1280x720";
pub const DEFAULT_IMAGE_WIDTH: u32 = 1280;
pub const DEFAULT_IMAGE_HEIGHT: u32 = 720;
pub const DEFAULT_TTS_VOICE: &str = "xiaoyan";
pub const DEFAULT_TTS_LANGUAGE: &str = "zh-CN";
pub const DEFAULT_TTS_SAMPLE_RATE: u32 = 24_000;
pub const DEFAULT_TTS_FORMAT: &str = "mp3";

// ---------------------------------------------------------------------------
// Request body
// ---------------------------------------------------------------------------

/// Parameters sent to the worker, one shape per job kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JobParams {
    Storyboard(StoryboardParams),
    Shot(ShotParams),
    Tts(TtsParams),
    Video {
        #[serde(flatten)]
        params: VideoParams,
        shot_id: EntityId,
        image_url: String,
    },
}

/// Body of `POST /v1/generate`.
#[derive(Debug, Clone, Serialize)]
pub struct JobRequest {
    pub id: EntityId,
    pub project_id: EntityId,
    pub shot_id: Option<EntityId>,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub progress: u8,
    pub message: String,
    pub result: Option<TaskResult>,
    pub error: String,
    pub parameters: JobParams,
    pub depends_on: Vec<EntityId>,
    pub estimated_duration: u32,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl JobRequest {
    pub fn new(task: &Task, parameters: JobParams) -> Self {
        Self {
            id: task.id,
            project_id: task.project_id,
            shot_id: task.target_shot(),
            task_type: task.task_type,
            status: task.status,
            progress: task.progress,
            message: task.message.clone(),
            result: task.result.clone(),
            error: task.error.clone(),
            parameters,
            depends_on: task.depends_on.clone(),
            estimated_duration: task.estimated_duration_secs,
            started_at: task.started_at,
            finished_at: task.finished_at,
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

pub struct Dispatcher {
    store: Arc<dyn Store>,
    worker: Arc<dyn GenerationWorker>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn Store>, worker: Arc<dyn GenerationWorker>) -> Self {
        Self { store, worker }
    }

    /// Submit `task` to the worker and return the assigned job id.
    pub async fn dispatch(&self, task: &Task) -> Result<String, DispatchError> {
        let request = self.prepare(task).await?;
        let body = serde_json::to_value(&request)?;
        let job_id = self.worker.submit(&body).await?;
        tracing::info!(
            task_id = %task.id,
            task_type = %task.task_type,
            job_id = %job_id,
            "Job submitted to worker",
        );
        Ok(job_id)
    }

    /// Build the submission body for `task`.
    pub async fn prepare(&self, task: &Task) -> Result<JobRequest, DispatchError> {
        let parameters = match (task.task_type, &task.parameters) {
            (TaskType::CreateProject, _) => {
                return Err(DispatchError::NotDispatchable(task.task_type))
            }
            (TaskType::Storyboard, Some(TaskParams::Storyboard(p))) => {
                JobParams::Storyboard(p.clone())
            }
            (TaskType::ShotImage | TaskType::RegenerateShot, Some(TaskParams::Shot(p))) => {
                JobParams::Shot(shot_defaults(task, p))
            }
            (TaskType::ProjectAudio, Some(TaskParams::Tts(p))) => JobParams::Tts(tts_defaults(p)),
            (TaskType::VideoGen, Some(TaskParams::Video(p))) => self.video_params(task, p).await?,
            (task_type, _) => {
                return Err(match task_type.expected_params() {
                    Some(expected) => DispatchError::MissingParameters {
                        task_type,
                        expected,
                    },
                    None => DispatchError::NotDispatchable(task_type),
                })
            }
        };
        Ok(JobRequest::new(task, parameters))
    }

    async fn video_params(&self, task: &Task, p: &VideoParams) -> Result<JobParams, DispatchError> {
        let shot_id = task
            .target_shot()
            .ok_or(DispatchError::NoTargetShot(task.task_type))?;
        let shot = self.store.get_shot(shot_id).await.map_err(|e| match e {
            StoreError::NotFound { .. } => DispatchError::ShotNotFound(shot_id),
            other => DispatchError::Store(other),
        })?;
        let image_url = shot
            .image_url
            .filter(|url| !url.trim().is_empty())
            .ok_or(DispatchError::ShotHasNoImage(shot_id))?;

        Ok(JobParams::Video {
            params: video_defaults(p),
            shot_id,
            image_url,
        })
    }
}

fn shot_defaults(task: &Task, p: &ShotParams) -> ShotParams {
    ShotParams {
        shot_id: p.shot_id.or(task.shot_id),
        image_width: if p.image_width == 0 { DEFAULT_IMAGE_WIDTH } else { p.image_width },
        image_height: if p.image_height == 0 { DEFAULT_IMAGE_HEIGHT } else { p.image_height },
        ..p.clone()
    }
}

fn tts_defaults(p: &TtsParams) -> TtsParams {
    let or = |value: &str, default: &str| {
        if value.trim().is_empty() {
            default.to_string()
        } else {
            value.to_string()
        }
    };
    TtsParams {
        voice: or(&p.voice, DEFAULT_TTS_VOICE),
        language: or(&p.language, DEFAULT_TTS_LANGUAGE),
        sample_rate: if p.sample_rate == 0 { DEFAULT_TTS_SAMPLE_RATE } else { p.sample_rate },
        format: or(&p.format, DEFAULT_TTS_FORMAT),
    }
}

fn video_defaults(p: &VideoParams) -> VideoParams {
    VideoParams {
        fps: if p.fps == 0 { DEFAULT_VIDEO_FPS } else { p.fps },
        resolution: if p.resolution.trim().is_empty() {
            DEFAULT_VIDEO_RESOLUTION.to_string()
        } else {
            p.resolution.clone()
        },
        ..p.clone()
    }
}
