//! In-process stand-ins for the generation worker and the artifact source.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use storyreel_core::task::TaskResult;
use storyreel_genworker::{
    Artifact, ArtifactFetcher, FetchError, GenerationWorker, JobStatusResponse, WorkerApiError,
};

/// One answer to `GET /v1/jobs/{id}`.
#[derive(Debug, Clone)]
pub enum Reply {
    Status(JobStatusResponse),
    /// The status query fails below the job level.
    Unreachable,
}

impl Reply {
    pub fn running(progress: u8, message: &str) -> Self {
        Self::Status(JobStatusResponse {
            status: "running".into(),
            progress,
            message: message.into(),
            ..Default::default()
        })
    }

    /// Success with `status` as the success synonym.
    pub fn succeeded_as(status: &str, resource_type: &str, url: &str) -> Self {
        Self::Status(JobStatusResponse {
            status: status.into(),
            progress: 100,
            result: Some(TaskResult {
                resource_type: resource_type.into(),
                resource_id: "artifact".into(),
                resource_url: url.into(),
            }),
            ..Default::default()
        })
    }

    pub fn succeeded(resource_type: &str, url: &str) -> Self {
        Self::succeeded_as("succeeded", resource_type, url)
    }

    pub fn failed(error: &str) -> Self {
        Self::Status(JobStatusResponse {
            status: "failed".into(),
            error: error.into(),
            ..Default::default()
        })
    }
}

#[derive(Default)]
struct WorkerState {
    next_job: u64,
    failing_submits: u32,
    submissions: Vec<Value>,
    pending_scripts: VecDeque<Vec<Reply>>,
    scripts: HashMap<String, VecDeque<Reply>>,
    cancelled: Vec<String>,
    status_calls: usize,
}

/// Worker whose job statuses follow a script. The last reply of a script
/// repeats; a job with no script reports `running` forever.
#[derive(Default)]
pub struct ScriptedWorker {
    state: Mutex<WorkerState>,
}

impl ScriptedWorker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script for the next job that gets submitted.
    pub fn script_next(&self, replies: Vec<Reply>) {
        self.lock().pending_scripts.push_back(replies);
    }

    /// Script for a job id that is already known.
    pub fn script_job(&self, job_id: &str, replies: Vec<Reply>) {
        self.lock().scripts.insert(job_id.to_string(), replies.into());
    }

    /// Make the next `n` submissions answer 503.
    pub fn fail_next_submits(&self, n: u32) {
        self.lock().failing_submits = n;
    }

    pub fn submissions(&self) -> Vec<Value> {
        self.lock().submissions.clone()
    }

    pub fn cancelled_jobs(&self) -> Vec<String> {
        self.lock().cancelled.clone()
    }

    pub fn status_calls(&self) -> usize {
        self.lock().status_calls
    }

    fn lock(&self) -> MutexGuard<'_, WorkerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl GenerationWorker for ScriptedWorker {
    async fn submit(&self, body: &Value) -> Result<String, WorkerApiError> {
        let mut state = self.lock();
        state.submissions.push(body.clone());
        if state.failing_submits > 0 {
            state.failing_submits -= 1;
            return Err(WorkerApiError::Status {
                status: 503,
                body: "overloaded".into(),
            });
        }
        state.next_job += 1;
        let job_id = format!("job-{}", state.next_job);
        if let Some(script) = state.pending_scripts.pop_front() {
            state.scripts.insert(job_id.clone(), script.into());
        }
        Ok(job_id)
    }

    async fn job_status(&self, job_id: &str) -> Result<JobStatusResponse, WorkerApiError> {
        let mut state = self.lock();
        state.status_calls += 1;
        let reply = match state.scripts.get_mut(job_id) {
            Some(script) if script.len() > 1 => script.pop_front(),
            Some(script) => script.front().cloned(),
            None => None,
        };
        match reply.unwrap_or_else(|| Reply::running(0, "")) {
            Reply::Status(mut job) => {
                job.id = job_id.to_string();
                Ok(job)
            }
            Reply::Unreachable => Err(WorkerApiError::Status {
                status: 502,
                body: "bad gateway".into(),
            }),
        }
    }

    async fn cancel_job(&self, job_id: &str) -> Result<(), WorkerApiError> {
        let mut state = self.lock();
        if !state.scripts.contains_key(job_id) && !job_id.starts_with("job-") {
            return Err(WorkerApiError::Status {
                status: 404,
                body: "job not found".into(),
            });
        }
        state.cancelled.push(job_id.to_string());
        Ok(())
    }
}

/// Artifact source backed by a map of URL to body.
#[derive(Default)]
pub struct MemoryFetcher {
    bodies: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.bodies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(url.to_string(), body.into());
    }
}

#[async_trait]
impl ArtifactFetcher for MemoryFetcher {
    async fn fetch(&self, url: &str) -> Result<Artifact, FetchError> {
        let body = self
            .bodies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(url)
            .cloned();
        match body {
            Some(bytes) => Ok(Artifact::from_bytes(bytes)),
            None => Err(FetchError::Status(404)),
        }
    }
}
