use std::time::Duration;

use storyreel_core::config::{env_bool, env_parse, env_string, ConfigError};
use storyreel_genworker::WorkerApi;
use storyreel_queue::EnqueueOptions;

/// Poll Loop cadence and absolute deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub deadline: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            deadline: Duration::from_secs(30 * 60),
        }
    }
}

/// Orchestration engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub worker_addr: String,
    pub worker_request_timeout: Duration,
    pub poll: PollConfig,
    /// Options every enqueued task carries.
    pub queue: EnqueueOptions,
    /// Number of queue consumers.
    pub concurrency: usize,
    /// Hand the poll phase to a background task so the consumer slot is
    /// freed right after dispatch.
    pub detach_polling: bool,
    /// Period of the blocked-task sweep; `None` disables it.
    pub dependency_sweep: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_addr: "http://127.0.0.1:8000".to_string(),
            worker_request_timeout: Duration::from_secs(30),
            poll: PollConfig::default(),
            queue: EnqueueOptions::default(),
            concurrency: 4,
            detach_polling: true,
            dependency_sweep: Some(Duration::from_secs(60)),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                       | Default                 |
    /// |-------------------------------|-------------------------|
    /// | `WORKER_ADDR`                 | `http://127.0.0.1:8000` |
    /// | `WORKER_REQUEST_TIMEOUT_SECS` | `30`                    |
    /// | `POLL_INTERVAL_SECS`          | `3`                     |
    /// | `POLL_DEADLINE_SECS`          | `1800`                  |
    /// | `QUEUE_CONCURRENCY`           | `4`                     |
    /// | `QUEUE_MAX_RETRY`             | `3`                     |
    /// | `QUEUE_HANDLER_TIMEOUT_SECS`  | `1200`                  |
    /// | `QUEUE_RETENTION_SECS`        | `86400`                 |
    /// | `QUEUE_RETRY_DELAY_SECS`      | `5`                     |
    /// | `DETACH_POLLING`              | `true`                  |
    /// | `DEPENDENCY_SWEEP_SECS`       | `60` (`0` disables)     |
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let secs = |name: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            env_parse(name, "number of seconds", default.as_secs()).map(Duration::from_secs)
        };

        let sweep_secs: u64 = env_parse("DEPENDENCY_SWEEP_SECS", "number of seconds", 60)?;
        let poll = PollConfig {
            interval: secs("POLL_INTERVAL_SECS", defaults.poll.interval)?,
            deadline: secs("POLL_DEADLINE_SECS", defaults.poll.deadline)?,
        };

        let config = Self {
            worker_addr: env_string("WORKER_ADDR", &defaults.worker_addr),
            worker_request_timeout: secs(
                "WORKER_REQUEST_TIMEOUT_SECS",
                defaults.worker_request_timeout,
            )?,
            poll,
            queue: EnqueueOptions {
                max_retry: env_parse("QUEUE_MAX_RETRY", "u32", defaults.queue.max_retry)?,
                timeout: secs("QUEUE_HANDLER_TIMEOUT_SECS", defaults.queue.timeout)?,
                retention: secs("QUEUE_RETENTION_SECS", defaults.queue.retention)?,
                retry_delay: secs("QUEUE_RETRY_DELAY_SECS", defaults.queue.retry_delay)?,
            },
            concurrency: env_parse("QUEUE_CONCURRENCY", "usize", defaults.concurrency)?.max(1),
            detach_polling: env_bool("DETACH_POLLING", defaults.detach_polling)?,
            dependency_sweep: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot honour.
    ///
    /// With `detach_polling` off the poll runs inside the queue attempt, so
    /// the handler timeout has to outlast the poll deadline or the attempt
    /// is dropped before the deadline can fail the task.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll.interval.is_zero() {
            return Err(ConfigError::Invalid {
                name: "POLL_INTERVAL_SECS",
                expected: "positive number of seconds",
                value: "0".to_string(),
            });
        }
        if !self.detach_polling && self.queue.timeout <= self.poll.deadline {
            return Err(ConfigError::Invalid {
                name: "QUEUE_HANDLER_TIMEOUT_SECS",
                expected: "number of seconds above POLL_DEADLINE_SECS when DETACH_POLLING is off",
                value: self.queue.timeout.as_secs().to_string(),
            });
        }
        Ok(())
    }

    /// Worker client with the configured per-request timeout.
    pub fn worker_api(&self) -> Result<WorkerApi, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(self.worker_request_timeout)
            .build()?;
        Ok(WorkerApi::with_client(client, self.worker_addr.clone()))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn defaults_follow_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.poll.interval, Duration::from_secs(3));
        assert_eq!(config.poll.deadline, Duration::from_secs(1800));
        assert_eq!(config.queue.max_retry, 3);
        assert_eq!(config.queue.timeout, Duration::from_secs(1200));
        assert!(config.detach_polling);
    }

    #[test]
    fn attached_polling_needs_handler_timeout_beyond_poll_deadline() {
        let mut config = EngineConfig {
            detach_polling: false,
            ..Default::default()
        };
        assert_matches!(
            config.validate(),
            Err(ConfigError::Invalid { name: "QUEUE_HANDLER_TIMEOUT_SECS", ref value, .. }) if value == "1200"
        );

        config.queue.timeout = config.poll.deadline + Duration::from_secs(60);
        assert!(config.validate().is_ok());

        config.detach_polling = true;
        config.queue.timeout = Duration::from_secs(60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let mut config = EngineConfig::default();
        config.poll.interval = Duration::ZERO;
        assert_matches!(
            config.validate(),
            Err(ConfigError::Invalid { name: "POLL_INTERVAL_SECS", .. })
        );
    }

    #[test]
    fn worker_api_uses_configured_address() {
        let config = EngineConfig {
            worker_addr: "http://worker:9000/".into(),
            ..Default::default()
        };
        assert_eq!(config.worker_api().unwrap().base_url(), "http://worker:9000");
    }
}
