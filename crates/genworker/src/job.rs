//! Job status document returned by `GET /v1/jobs/{id}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use storyreel_core::task::TaskResult;

use crate::timestamps::deserialize_lenient;

/// Status strings that mean the job succeeded.
pub const SUCCESS_STATUSES: [&str; 4] = ["finished", "success", "succeeded", "completed"];

/// Status strings that mean the job failed.
pub const FAILURE_STATUSES: [&str; 2] = ["failed", "error"];

/// Where a remote job is in its lifecycle, as far as the engine cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Succeeded,
    Failed,
    /// Anything else: queued, running, or a status we do not recognise.
    Running,
}

impl JobState {
    /// Classify a worker status string. Case and surrounding whitespace
    /// are ignored.
    pub fn classify(status: &str) -> Self {
        let status = status.trim().to_ascii_lowercase();
        if SUCCESS_STATUSES.contains(&status.as_str()) {
            Self::Succeeded
        } else if FAILURE_STATUSES.contains(&status.as_str()) {
            Self::Failed
        } else {
            Self::Running
        }
    }
}

/// Job status as reported by the worker.
///
/// Every field is optional on the wire. Timestamps that are missing or do
/// not parse are `None`; they never fail the document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobStatusResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, rename = "type", deserialize_with = "null_as_default")]
    pub job_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,
    #[serde(default, deserialize_with = "deserialize_progress")]
    pub progress: u8,
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
    #[serde(default, deserialize_with = "deserialize_result")]
    pub result: Option<TaskResult>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub error: String,
    #[serde(
        default,
        rename = "estimatedDuration",
        alias = "estimated_duration",
        deserialize_with = "deserialize_number"
    )]
    pub estimated_duration: Option<f64>,
    #[serde(default, rename = "startedAt", alias = "started_at", deserialize_with = "deserialize_lenient")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, rename = "finishedAt", alias = "finished_at", deserialize_with = "deserialize_lenient")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, rename = "createdAt", alias = "created_at", deserialize_with = "deserialize_lenient")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, rename = "updatedAt", alias = "updated_at", deserialize_with = "deserialize_lenient")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl JobStatusResponse {
    pub fn state(&self) -> JobState {
        JobState::classify(&self.status)
    }

    /// Text to record when the job failed: the error field, falling back
    /// to the message, then to the raw status.
    pub fn failure_text(&self) -> String {
        [&self.error, &self.message]
            .into_iter()
            .find(|s| !s.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| format!("worker reported status '{}'", self.status))
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accept integer or fractional progress, clamped to 0..=100.
fn deserialize_progress<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let progress = value.as_ref().and_then(serde_json::Value::as_f64).unwrap_or(0.0);
    Ok(progress.clamp(0.0, 100.0).round() as u8)
}

fn deserialize_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(serde_json::Value::as_f64))
}

/// A result object with no url and no id is treated as absent.
fn deserialize_result<'de, D>(deserializer: D) -> Result<Option<TaskResult>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let Some(value @ serde_json::Value::Object(_)) = value else {
        return Ok(None);
    };
    let result: TaskResult = serde_json::from_value(value).map_err(serde::de::Error::custom)?;
    if result.resource_url.is_empty() && result.resource_id.is_empty() {
        return Ok(None);
    }
    Ok(Some(result))
}
