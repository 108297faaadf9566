//! Poll Loop: wait for a remote job to reach a terminal state.
//!
//! Each cycle waits on three things: the absolute deadline (measured from
//! loop start unless the caller passes what is left of it, never reset by
//! polls), the cancellation token, and the next
//! tick. A tick issues one status query; the query itself is raced against
//! the deadline and the token so neither is delayed by a slow worker.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use storyreel_core::task::TaskResult;
use storyreel_genworker::{GenerationWorker, JobState, JobStatusResponse};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::PollConfig;
use crate::error::PollError;

/// Receives progress of a job that is still running.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, job: &JobStatusResponse);
}

/// Discards progress.
pub struct NoProgress;

#[async_trait]
impl ProgressSink for NoProgress {
    async fn report(&self, _job: &JobStatusResponse) {}
}

pub struct Poller {
    worker: Arc<dyn GenerationWorker>,
    config: PollConfig,
}

impl Poller {
    pub fn new(worker: Arc<dyn GenerationWorker>, config: PollConfig) -> Self {
        Self { worker, config }
    }

    pub fn config(&self) -> PollConfig {
        self.config
    }

    /// Poll `job_id` until it succeeds, fails, the deadline passes or
    /// `cancel` fires. Returns the job's result locator on success; a
    /// success without a locator yields an empty one.
    pub async fn poll(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> Result<TaskResult, PollError> {
        self.poll_within(job_id, self.config.deadline, cancel, progress)
            .await
    }

    /// Like [`poll`](Self::poll), with `budget` in place of the configured
    /// deadline. Used when part of the deadline was spent by an earlier
    /// attempt; a zero budget times out before the first query.
    pub async fn poll_within(
        &self,
        job_id: &str,
        budget: Duration,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> Result<TaskResult, PollError> {
        let deadline = tokio::time::sleep(budget);
        tokio::pin!(deadline);
        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.config.interval, self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let timeout = || PollError::Timeout {
            job_id: job_id.to_string(),
            after: budget,
        };
        let cancelled = || PollError::Cancelled {
            job_id: job_id.to_string(),
        };

        let mut last_reported: Option<(u8, String)> = None;
        let mut failed_queries: u32 = 0;

        loop {
            tokio::select! {
                biased;
                _ = &mut deadline => {
                    tracing::warn!(job_id, deadline_secs = budget.as_secs(), "Poll deadline exceeded");
                    return Err(timeout());
                }
                _ = cancel.cancelled() => {
                    tracing::info!(job_id, "Polling cancelled");
                    return Err(cancelled());
                }
                _ = ticker.tick() => {}
            }

            let response = tokio::select! {
                biased;
                _ = &mut deadline => return Err(timeout()),
                _ = cancel.cancelled() => return Err(cancelled()),
                response = self.worker.job_status(job_id) => response,
            };

            let job = match response {
                Ok(job) => job,
                Err(e) => {
                    failed_queries += 1;
                    tracing::warn!(job_id, failed_queries, error = %e, "Job status query failed, will retry");
                    continue;
                }
            };

            match job.state() {
                JobState::Succeeded => {
                    tracing::info!(job_id, status = %job.status, "Job succeeded");
                    return Ok(job.result.unwrap_or_default());
                }
                JobState::Failed => {
                    let error = job.failure_text();
                    tracing::warn!(job_id, error = %error, "Worker reported job failure");
                    return Err(PollError::WorkerFailure {
                        job_id: job_id.to_string(),
                        error,
                    });
                }
                JobState::Running => {
                    let current = (job.progress, job.message.clone());
                    if last_reported.as_ref() != Some(&current) {
                        tracing::debug!(job_id, status = %job.status, progress = job.progress, "Job running");
                        progress.report(&job).await;
                        last_reported = Some(current);
                    }
                }
            }
        }
    }
}
