use std::time::Duration;

use storyreel_core::error::CoreError;
use storyreel_core::task::{ParamsKind, TaskType};
use storyreel_core::types::EntityId;
use storyreel_cloud::StorageError;
use storyreel_db::StoreError;
use storyreel_genworker::{FetchError, WorkerApiError};
use storyreel_queue::QueueError;

/// Failure to turn a task into a submitted worker job. Retried at the
/// queue-handler level.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("missing {expected} parameters for {task_type} task")]
    MissingParameters {
        task_type: TaskType,
        expected: ParamsKind,
    },

    #[error("{0} tasks are not dispatched to the worker")]
    NotDispatchable(TaskType),

    #[error("{0} task has no target shot")]
    NoTargetShot(TaskType),

    #[error("shot not found: {0}")]
    ShotNotFound(EntityId),

    #[error("shot has no image")]
    ShotHasNoImage(EntityId),

    #[error("could not encode job request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("worker request failed: {0}")]
    Worker(#[from] WorkerApiError),
}

impl DispatchError {
    /// Whether another attempt could succeed without the task changing:
    /// the worker or the store was unreachable or refused the request.
    /// Missing parameters and unmet preconditions are permanent.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Worker(_) | Self::Store(_))
    }
}

/// How a poll loop ended without a result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    #[error("polling timed out after {}s", .after.as_secs())]
    Timeout { job_id: String, after: Duration },

    #[error("polling cancelled")]
    Cancelled { job_id: String },

    #[error("worker reported failure: {error}")]
    WorkerFailure { job_id: String, error: String },
}

/// Failure of a result router branch.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("result has no resource url")]
    MissingUrl,

    #[error("{0} task has no target shot")]
    NoTargetShot(TaskType),

    #[error("artifact download failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("artifact upload failed: {0}")]
    Storage(#[from] StorageError),

    #[error("invalid storyboard: {0}")]
    Storyboard(CoreError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl RouteError {
    /// Whether the artifact could not be moved into durable storage, as
    /// opposed to a result the task type cannot use.
    pub fn is_persist(&self) -> bool {
        matches!(self, Self::Fetch(_) | Self::Storage(_) | Self::Store(_))
    }
}

/// Engine-level errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("worker reported failure: {0}")]
    WorkerReportedFailure(String),

    #[error("polling timed out after {}s", .0.as_secs())]
    PollTimeout(Duration),

    #[error("polling cancelled")]
    PollCancelled,

    #[error("could not persist result: {0}")]
    Persist(String),

    #[error("unusable result: {0}")]
    BusinessResult(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            StoreError::Conflict(msg) => Self::Conflict(msg),
            StoreError::Invalid(msg) => Self::Validation(msg),
            StoreError::Serialization(e) => Self::Serialization(e.to_string()),
            other => Self::Store(other),
        }
    }
}

impl From<CoreError> for PipelineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            CoreError::Validation(msg) => Self::Validation(msg),
            CoreError::Conflict(msg) => Self::Conflict(msg),
            CoreError::Internal(msg) => Self::Store(StoreError::Invalid(msg)),
        }
    }
}

impl From<PollError> for PipelineError {
    fn from(err: PollError) -> Self {
        match err {
            PollError::Timeout { after, .. } => Self::PollTimeout(after),
            PollError::Cancelled { .. } => Self::PollCancelled,
            PollError::WorkerFailure { error, .. } => Self::WorkerReportedFailure(error),
        }
    }
}

impl From<RouteError> for PipelineError {
    fn from(err: RouteError) -> Self {
        if err.is_persist() {
            Self::Persist(err.to_string())
        } else {
            Self::BusinessResult(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn store_not_found_maps_to_not_found() {
        let err: PipelineError = StoreError::not_found("Task", "t1").into();
        assert_matches!(err, PipelineError::NotFound { entity: "Task", ref id } if id == "t1");
    }

    #[test]
    fn route_errors_split_into_persist_and_business() {
        let persist: PipelineError = RouteError::Fetch(FetchError::Status(404)).into();
        assert_matches!(persist, PipelineError::Persist(_));

        let business: PipelineError = RouteError::MissingUrl.into();
        assert_matches!(business, PipelineError::BusinessResult(ref m) if m == "result has no resource url");
    }

    #[test]
    fn only_worker_and_store_dispatch_errors_are_transient() {
        let missing_image = DispatchError::ShotHasNoImage(storyreel_core::types::new_id());
        assert!(!missing_image.is_transient());
        assert_eq!(missing_image.to_string(), "shot has no image");

        let unavailable = DispatchError::Worker(WorkerApiError::Status {
            status: 503,
            body: "overloaded".into(),
        });
        assert!(unavailable.is_transient());
    }

    #[test]
    fn poll_errors_keep_worker_text() {
        let err: PipelineError = PollError::WorkerFailure {
            job_id: "j".into(),
            error: "OOM".into(),
        }
        .into();
        assert_eq!(err.to_string(), "worker reported failure: OOM");
    }
}
