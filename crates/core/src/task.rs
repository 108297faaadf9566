//! Task record, kinds, parameter variants and the status state machine.
//!
//! A [`Task`] is one unit of orchestrated generation work. Its
//! [`TaskType`] never changes after creation and selects exactly one
//! [`TaskParams`] variant. Status changes go through [`StatusUpdate`],
//! which enforces the transition table in [`TaskStatus::can_transition_to`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{EntityId, Timestamp};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Resource type written into [`TaskResult`] while a remote job is running.
pub const RESOURCE_TYPE_JOB: &str = "job";

/// Progress value written when a task finishes.
pub const PROGRESS_COMPLETE: u8 = 100;

// ---------------------------------------------------------------------------
// Task type
// ---------------------------------------------------------------------------

/// Kind of generation work a task performs.
///
/// Serialized with the wire names used by the generation worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    /// Bookkeeping task for a freshly created project; finishes immediately.
    #[serde(rename = "create_project")]
    CreateProject,
    /// Story text to an ordered list of shots.
    #[serde(rename = "generate_storyboard")]
    Storyboard,
    /// Shot prompt to a keyframe image.
    #[serde(rename = "generate_shot")]
    ShotImage,
    /// Re-run of the keyframe image for an edited shot.
    #[serde(rename = "regenerate_shot")]
    RegenerateShot,
    /// Narration text to speech.
    #[serde(rename = "generate_audio")]
    ProjectAudio,
    /// Keyframe image to video clip.
    #[serde(rename = "generate_video")]
    VideoGen,
}

impl TaskType {
    /// All task types, in declaration order.
    pub const ALL: [TaskType; 6] = [
        Self::CreateProject,
        Self::Storyboard,
        Self::ShotImage,
        Self::RegenerateShot,
        Self::ProjectAudio,
        Self::VideoGen,
    ];

    /// Wire name of the task type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateProject => "create_project",
            Self::Storyboard => "generate_storyboard",
            Self::ShotImage => "generate_shot",
            Self::RegenerateShot => "regenerate_shot",
            Self::ProjectAudio => "generate_audio",
            Self::VideoGen => "generate_video",
        }
    }

    /// Parameter variant this task type requires, or `None` for task
    /// types that never reach the worker.
    pub fn expected_params(self) -> Option<ParamsKind> {
        match self {
            Self::CreateProject => None,
            Self::Storyboard => Some(ParamsKind::Storyboard),
            Self::ShotImage | Self::RegenerateShot => Some(ParamsKind::Shot),
            Self::ProjectAudio => Some(ParamsKind::Tts),
            Self::VideoGen => Some(ParamsKind::Video),
        }
    }

    /// Whether results of this task type are attached to a shot.
    pub fn targets_shot(self) -> bool {
        matches!(
            self,
            Self::ShotImage | Self::RegenerateShot | Self::ProjectAudio | Self::VideoGen
        )
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CoreError::Validation(format!("Unknown task type '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Task status
// ---------------------------------------------------------------------------

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Blocked,
    Processing,
    Finished,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// All statuses, in declaration order.
    pub const ALL: [TaskStatus; 6] = [
        Self::Pending,
        Self::Blocked,
        Self::Processing,
        Self::Finished,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Statuses from which a task may still change.
    pub const ACTIVE: [TaskStatus; 3] = [Self::Pending, Self::Blocked, Self::Processing];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Blocked => "blocked",
            Self::Processing => "processing",
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// `finished`, `failed` and `cancelled` are terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Cancelled)
    }

    /// Initial status for a task with the given dependency set.
    pub fn initial_for(depends_on: &[EntityId]) -> Self {
        if depends_on.is_empty() {
            Self::Pending
        } else {
            Self::Blocked
        }
    }

    /// Whether a task in `self` may move to `next`.
    ///
    /// Re-writing the same non-terminal status is allowed so that progress,
    /// message and job reference updates can ride on a status write.
    /// Blocked tasks may fail or be cancelled when a prerequisite does.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;

        if self.is_terminal() {
            return false;
        }
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Blocked, Pending)
                | (Blocked, Failed)
                | (Blocked, Cancelled)
                | (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Finished)
                | (Processing, Failed)
                | (Processing, Cancelled)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| CoreError::Validation(format!("Unknown task status '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Storyboard generation parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoryboardParams {
    pub shot_count: u32,
    #[serde(default)]
    pub style: String,
    #[serde(default, alias = "storyText")]
    pub story_text: String,
}

/// Keyframe image parameters for one shot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShotParams {
    #[serde(default, alias = "shotId")]
    pub shot_id: Option<EntityId>,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub transition: String,
    #[serde(default)]
    pub style: String,
    #[serde(default)]
    pub image_width: u32,
    #[serde(default)]
    pub image_height: u32,
}

/// Text-to-speech parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TtsParams {
    #[serde(default)]
    pub voice: String,
    #[serde(default, alias = "lang")]
    pub language: String,
    #[serde(default)]
    pub sample_rate: u32,
    #[serde(default)]
    pub format: String,
}

/// Image-to-video parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoParams {
    #[serde(default)]
    pub resolution: String,
    #[serde(default)]
    pub fps: u32,
    #[serde(default)]
    pub bitrate: u32,
    #[serde(default)]
    pub format: String,
}

/// Discriminant of [`TaskParams`], used in error messages and validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamsKind {
    Storyboard,
    Shot,
    Tts,
    Video,
}

impl ParamsKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Storyboard => "storyboard",
            Self::Shot => "shot",
            Self::Tts => "tts",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for ParamsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-specific task parameters. Exactly one variant per task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskParams {
    Storyboard(StoryboardParams),
    Shot(ShotParams),
    Tts(TtsParams),
    Video(VideoParams),
}

impl TaskParams {
    pub fn kind(&self) -> ParamsKind {
        match self {
            Self::Storyboard(_) => ParamsKind::Storyboard,
            Self::Shot(_) => ParamsKind::Shot,
            Self::Tts(_) => ParamsKind::Tts,
            Self::Video(_) => ParamsKind::Video,
        }
    }
}

// ---------------------------------------------------------------------------
// Result locator
// ---------------------------------------------------------------------------

/// Minimal locator of a generated artifact. Never the payload itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    #[serde(default)]
    pub resource_type: String,
    #[serde(default)]
    pub resource_id: String,
    #[serde(default)]
    pub resource_url: String,
}

impl TaskResult {
    /// Locator pointing at a remote job that is still running.
    pub fn job_reference(job_id: impl Into<String>) -> Self {
        Self {
            resource_type: RESOURCE_TYPE_JOB.to_string(),
            resource_id: job_id.into(),
            resource_url: String::new(),
        }
    }

    /// The remote job id, if this locator is a job reference.
    pub fn job_id(&self) -> Option<&str> {
        (self.resource_type == RESOURCE_TYPE_JOB && !self.resource_id.is_empty())
            .then_some(self.resource_id.as_str())
    }
}

// ---------------------------------------------------------------------------
// Task record
// ---------------------------------------------------------------------------

/// The persisted unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: EntityId,
    pub project_id: EntityId,
    pub shot_id: Option<EntityId>,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub progress: u8,
    pub message: String,
    pub error: String,
    pub parameters: Option<TaskParams>,
    pub result: Option<TaskResult>,
    pub depends_on: Vec<EntityId>,
    pub estimated_duration_secs: u32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
}

impl Task {
    /// Remote job id stored on the record by a successful dispatch.
    pub fn job_id(&self) -> Option<&str> {
        self.result.as_ref().and_then(TaskResult::job_id)
    }

    /// Shot this task writes to: the owning shot, or the one named in the
    /// shot parameters.
    pub fn target_shot(&self) -> Option<EntityId> {
        self.shot_id.or(match &self.parameters {
            Some(TaskParams::Shot(p)) => p.shot_id,
            _ => None,
        })
    }

    /// Apply a status update in place, enforcing the transition table.
    pub fn apply(&mut self, update: &StatusUpdate, now: Timestamp) -> Result<(), CoreError> {
        if !self.status.can_transition_to(update.status) {
            return Err(CoreError::Conflict(format!(
                "Task {} cannot move from {} to {}",
                self.id, self.status, update.status
            )));
        }
        if update.result.is_some()
            && matches!(
                update.status,
                TaskStatus::Pending | TaskStatus::Blocked | TaskStatus::Cancelled
            )
        {
            return Err(CoreError::Validation(format!(
                "A result cannot be attached to a {} task",
                update.status
            )));
        }

        self.status = update.status;
        if let Some(result) = &update.result {
            self.result = Some(result.clone());
        }
        if let Some(message) = &update.message {
            self.message = message.clone();
        }
        if let Some(error) = &update.error {
            self.error = error.clone();
        }
        if update.status == TaskStatus::Processing && self.started_at.is_none() {
            self.started_at = Some(update.started_at.unwrap_or(now));
        }
        if update.status.is_terminal() {
            self.finished_at = Some(update.finished_at.unwrap_or(now));
        }
        if update.status == TaskStatus::Finished {
            self.progress = PROGRESS_COMPLETE;
        }
        self.updated_at = now;
        Ok(())
    }

    /// Mirror worker-reported progress onto a non-terminal task.
    pub fn apply_progress(&mut self, progress: u8, message: Option<&str>, now: Timestamp) {
        if self.status.is_terminal() {
            return;
        }
        self.progress = progress.min(PROGRESS_COMPLETE);
        if let Some(message) = message {
            self.message = message.to_string();
        }
        self.updated_at = now;
    }
}

/// Input for creating a task.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTask {
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub project_id: EntityId,
    #[serde(default)]
    pub shot_id: Option<EntityId>,
    #[serde(default)]
    pub parameters: Option<TaskParams>,
    #[serde(default)]
    pub depends_on: Vec<EntityId>,
    #[serde(default)]
    pub estimated_duration_secs: u32,
}

impl NewTask {
    pub fn new(task_type: TaskType, project_id: EntityId) -> Self {
        Self {
            task_type,
            project_id,
            shot_id: None,
            parameters: None,
            depends_on: Vec::new(),
            estimated_duration_secs: 0,
        }
    }

    pub fn with_shot(mut self, shot_id: EntityId) -> Self {
        self.shot_id = Some(shot_id);
        self
    }

    pub fn with_params(mut self, params: TaskParams) -> Self {
        self.parameters = Some(params);
        self
    }

    pub fn depends_on(mut self, ids: impl IntoIterator<Item = EntityId>) -> Self {
        self.depends_on.extend(ids);
        self
    }

    /// Check that the parameter variant (when present) matches the type.
    ///
    /// Missing parameters are accepted here; the dispatcher reports them
    /// when the task runs.
    pub fn validate(&self) -> Result<(), CoreError> {
        match (self.task_type.expected_params(), &self.parameters) {
            (None, Some(p)) => Err(CoreError::Validation(format!(
                "{} tasks take no parameters, got '{}'",
                self.task_type,
                p.kind()
            ))),
            (Some(expected), Some(p)) if p.kind() != expected => {
                Err(CoreError::Validation(format!(
                    "{} tasks require '{expected}' parameters, got '{}'",
                    self.task_type,
                    p.kind()
                )))
            }
            _ => Ok(()),
        }
    }

    /// Build the task record. The dependency set is de-duplicated in order
    /// and determines the initial status.
    pub fn into_task(self, id: EntityId, now: Timestamp) -> Task {
        let mut depends_on: Vec<EntityId> = Vec::with_capacity(self.depends_on.len());
        for dep in self.depends_on {
            if dep != id && !depends_on.contains(&dep) {
                depends_on.push(dep);
            }
        }

        Task {
            id,
            project_id: self.project_id,
            shot_id: self.shot_id,
            task_type: self.task_type,
            status: TaskStatus::initial_for(&depends_on),
            progress: 0,
            message: String::new(),
            error: String::new(),
            parameters: self.parameters,
            result: None,
            depends_on,
            estimated_duration_secs: self.estimated_duration_secs,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Status update contract
// ---------------------------------------------------------------------------

/// A status write, optionally carrying result, message, error and
/// timestamps. The only way the engine mutates a task's status.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: TaskStatus,
    pub result: Option<TaskResult>,
    pub message: Option<String>,
    pub error: Option<String>,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
}

impl StatusUpdate {
    pub fn new(status: TaskStatus) -> Self {
        Self {
            status,
            result: None,
            message: None,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn with_result(mut self, result: TaskResult) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Utc;

    use super::*;
    use crate::types::new_id;

    fn task(status: TaskStatus) -> Task {
        let mut t = NewTask::new(TaskType::ShotImage, new_id()).into_task(new_id(), Utc::now());
        t.status = status;
        t
    }

    #[test]
    fn task_type_wire_names_round_trip() {
        for t in TaskType::ALL {
            assert_eq!(t.as_str().parse::<TaskType>().unwrap(), t);
            let json = serde_json::to_value(t).unwrap();
            assert_eq!(json, t.as_str());
        }
        assert!("generate_everything".parse::<TaskType>().is_err());
    }

    #[test]
    fn terminal_statuses_never_change() {
        for from in [TaskStatus::Finished, TaskStatus::Failed, TaskStatus::Cancelled] {
            for to in TaskStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be rejected");
            }
        }
    }

    #[test]
    fn allowed_transitions_follow_table() {
        assert!(TaskStatus::Blocked.can_transition_to(TaskStatus::Pending));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Processing));
        assert!(TaskStatus::Processing.can_transition_to(TaskStatus::Finished));
        assert!(TaskStatus::Processing.can_transition_to(TaskStatus::Failed));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Cancelled));
        assert!(TaskStatus::Blocked.can_transition_to(TaskStatus::Cancelled));
        assert!(TaskStatus::Processing.can_transition_to(TaskStatus::Processing));
    }

    #[test]
    fn skipping_processing_is_rejected() {
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Finished));
        assert!(!TaskStatus::Blocked.can_transition_to(TaskStatus::Processing));
        assert!(!TaskStatus::Processing.can_transition_to(TaskStatus::Pending));
    }

    #[test]
    fn initial_status_depends_on_dependencies() {
        assert_eq!(TaskStatus::initial_for(&[]), TaskStatus::Pending);
        assert_eq!(TaskStatus::initial_for(&[new_id()]), TaskStatus::Blocked);
    }

    #[test]
    fn into_task_dedupes_dependencies() {
        let dep = new_id();
        let t = NewTask::new(TaskType::ShotImage, new_id())
            .depends_on([dep, dep])
            .into_task(new_id(), Utc::now());
        assert_eq!(t.depends_on, vec![dep]);
        assert_eq!(t.status, TaskStatus::Blocked);
    }

    #[test]
    fn validate_rejects_mismatched_params() {
        let t = NewTask::new(TaskType::VideoGen, new_id())
            .with_params(TaskParams::Tts(TtsParams::default()));
        assert_matches!(t.validate(), Err(CoreError::Validation(_)));

        let t = NewTask::new(TaskType::CreateProject, new_id())
            .with_params(TaskParams::Video(VideoParams::default()));
        assert_matches!(t.validate(), Err(CoreError::Validation(_)));

        let t = NewTask::new(TaskType::RegenerateShot, new_id())
            .with_params(TaskParams::Shot(ShotParams::default()));
        assert!(t.validate().is_ok());
    }

    #[test]
    fn apply_sets_timestamps_and_progress() {
        let mut t = task(TaskStatus::Pending);
        let now = Utc::now();
        t.apply(&StatusUpdate::new(TaskStatus::Processing), now).unwrap();
        assert_eq!(t.started_at, Some(now));

        t.apply(
            &StatusUpdate::new(TaskStatus::Finished).with_result(TaskResult {
                resource_type: "image".into(),
                resource_id: "r1".into(),
                resource_url: "http://x/y.png".into(),
            }),
            now,
        )
        .unwrap();
        assert_eq!(t.progress, PROGRESS_COMPLETE);
        assert_eq!(t.finished_at, Some(now));
        assert_eq!(t.result.as_ref().unwrap().resource_url, "http://x/y.png");
    }

    #[test]
    fn apply_rejects_result_on_cancel() {
        let mut t = task(TaskStatus::Processing);
        let err = t
            .apply(
                &StatusUpdate::new(TaskStatus::Cancelled).with_result(TaskResult::default()),
                Utc::now(),
            )
            .unwrap_err();
        assert_matches!(err, CoreError::Validation(_));
        assert_eq!(t.status, TaskStatus::Processing);
    }

    #[test]
    fn job_reference_is_recognised() {
        let mut t = task(TaskStatus::Processing);
        assert!(t.job_id().is_none());
        t.result = Some(TaskResult::job_reference("job-7"));
        assert_eq!(t.job_id(), Some("job-7"));
    }

    #[test]
    fn params_are_internally_tagged() {
        let p = TaskParams::Video(VideoParams {
            fps: 30,
            ..Default::default()
        });
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["kind"], "video");
        assert_eq!(json["fps"], 30);

        let back: TaskParams =
            serde_json::from_value(serde_json::json!({"kind": "storyboard", "shot_count": 3, "storyText": "once"}))
                .unwrap();
        assert_matches!(back, TaskParams::Storyboard(ref s) if s.shot_count == 3 && s.story_text == "once");
    }

    #[test]
    fn target_shot_falls_back_to_params() {
        let shot = new_id();
        let t = NewTask::new(TaskType::RegenerateShot, new_id())
            .with_params(TaskParams::Shot(ShotParams {
                shot_id: Some(shot),
                ..Default::default()
            }))
            .into_task(new_id(), Utc::now());
        assert_eq!(t.target_shot(), Some(shot));
    }
}
