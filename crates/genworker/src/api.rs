//! REST client for the generation worker.

use async_trait::async_trait;
use serde::Deserialize;

use crate::job::JobStatusResponse;

/// Status codes `POST /v1/generate` may answer with on success.
pub const ACCEPTED_SUBMIT_STATUSES: [u16; 3] = [200, 201, 202];

/// Errors from the worker REST layer.
#[derive(Debug, thiserror::Error)]
pub enum WorkerApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The worker answered with a status code the endpoint does not accept.
    #[error("worker returned status {status}: {body}")]
    Status {
        status: u16,
        /// Error text from the body, or the raw body.
        body: String,
    },

    /// A submission response carried neither `id` nor `job_id`.
    #[error("worker response has no job id")]
    MissingJobId,

    /// The response body was not the expected JSON.
    #[error("invalid worker response: {0}")]
    Decode(String),

    /// The base URL cannot have a job path appended.
    #[error("invalid worker URL '{0}'")]
    InvalidUrl(String),
}

impl WorkerApiError {
    /// Whether the failure happened below HTTP (connection, timeout).
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Request(_))
    }
}

/// The worker operations the engine depends on.
#[async_trait]
pub trait GenerationWorker: Send + Sync {
    /// Submit a job and return the worker-assigned job id.
    async fn submit(&self, body: &serde_json::Value) -> Result<String, WorkerApiError>;

    /// Query the status of a job.
    async fn job_status(&self, job_id: &str) -> Result<JobStatusResponse, WorkerApiError>;

    /// Ask the worker to cancel a job.
    async fn cancel_job(&self, job_id: &str) -> Result<(), WorkerApiError>;
}

#[derive(Debug, Default, Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    job_id: Option<serde_json::Value>,
}

impl SubmitResponse {
    /// The first of `id` / `job_id` that is a non-empty string or a number.
    fn job_id(self) -> Option<String> {
        [self.id, self.job_id]
            .into_iter()
            .flatten()
            .find_map(|v| match v {
                serde_json::Value::String(s) if !s.trim().is_empty() => Some(s),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(alias = "message", alias = "detail")]
    error: String,
}

/// HTTP client for a single generation worker.
#[derive(Clone)]
pub struct WorkerApi {
    client: reqwest::Client,
    base_url: String,
}

impl WorkerApi {
    /// * `base_url` - e.g. `http://127.0.0.1:8000`. A trailing slash is
    ///   ignored.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Reuse an existing [`reqwest::Client`], e.g. one configured with a
    /// request timeout.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `{base}/v1/jobs/{job_id}`. Job ids are opaque, so the id is
    /// percent-encoded as a single path segment.
    fn job_url(&self, job_id: &str) -> Result<reqwest::Url, WorkerApiError> {
        let invalid = || WorkerApiError::InvalidUrl(self.base_url.clone());
        let mut url = reqwest::Url::parse(&self.base_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(["v1", "jobs", job_id]);
        Ok(url)
    }

    // ---- private helpers ----

    /// Turn a rejected response into [`WorkerApiError::Status`], extracting
    /// the `error` field of a JSON body when there is one.
    async fn status_error(response: reqwest::Response) -> WorkerApiError {
        let status = response.status().as_u16();
        let raw = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        let body = serde_json::from_str::<ErrorBody>(&raw)
            .map(|e| e.error)
            .unwrap_or(raw);
        WorkerApiError::Status { status, body }
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, WorkerApiError> {
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| WorkerApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl GenerationWorker for WorkerApi {
    async fn submit(&self, body: &serde_json::Value) -> Result<String, WorkerApiError> {
        let response = self
            .client
            .post(format!("{}/v1/generate", self.base_url))
            .json(body)
            .send()
            .await?;

        if !ACCEPTED_SUBMIT_STATUSES.contains(&response.status().as_u16()) {
            return Err(Self::status_error(response).await);
        }

        let parsed: SubmitResponse = Self::decode(response).await?;
        parsed.job_id().ok_or(WorkerApiError::MissingJobId)
    }

    async fn job_status(&self, job_id: &str) -> Result<JobStatusResponse, WorkerApiError> {
        let response = self.client.get(self.job_url(job_id)?).send().await?;
        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }
        Self::decode(response).await
    }

    async fn cancel_job(&self, job_id: &str) -> Result<(), WorkerApiError> {
        let response = self.client.delete(self.job_url(job_id)?).send().await?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(Self::status_error(response).await);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Option<String> {
        serde_json::from_str::<SubmitResponse>(json).unwrap().job_id()
    }

    #[test]
    fn job_id_from_id_or_job_id() {
        assert_eq!(parse(r#"{"id": "a"}"#).as_deref(), Some("a"));
        assert_eq!(parse(r#"{"job_id": "b"}"#).as_deref(), Some("b"));
        assert_eq!(parse(r#"{"id": "", "job_id": "c"}"#).as_deref(), Some("c"));
        assert_eq!(parse(r#"{"id": 17}"#).as_deref(), Some("17"));
    }

    #[test]
    fn missing_job_id() {
        assert_eq!(parse(r#"{}"#), None);
        assert_eq!(parse(r#"{"id": null, "job_id": ""}"#), None);
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let api = WorkerApi::new("http://worker:8000/");
        assert_eq!(api.job_url("j1").unwrap().as_str(), "http://worker:8000/v1/jobs/j1");
    }

    #[test]
    fn job_id_is_one_encoded_segment() {
        let api = WorkerApi::new("http://worker:8000/gpu-a");
        assert_eq!(
            api.job_url("batch/7?x#y").unwrap().as_str(),
            "http://worker:8000/gpu-a/v1/jobs/batch%2F7%3Fx%23y"
        );
    }

    #[test]
    fn unusable_base_url_is_an_error() {
        let api = WorkerApi::new("not a url");
        assert!(matches!(api.job_url("j1"), Err(WorkerApiError::InvalidUrl(_))));
    }
}
