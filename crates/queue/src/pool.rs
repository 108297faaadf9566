//! Fixed-size pool of consumers draining a [`TaskQueue`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use storyreel_core::types::EntityId;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::HandlerError;
use crate::queue::{QueuedItem, TaskQueue};

/// One delivery of a task id to a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub task_id: EntityId,
    /// Attempts made before this one.
    pub retried: u32,
    pub max_retry: u32,
    /// Time the handler gets before the attempt is dropped.
    pub timeout: Duration,
}

impl Delivery {
    /// 1-based attempt number.
    pub fn attempt(&self) -> u32 {
        self.retried + 1
    }

    /// No redelivery follows this attempt whatever the handler returns.
    pub fn is_final_attempt(&self) -> bool {
        self.retried >= self.max_retry
    }
}

fn delivery_of(item: &QueuedItem) -> Delivery {
    Delivery {
        task_id: item.task_id,
        retried: item.retried,
        max_retry: item.options.max_retry,
        timeout: item.options.timeout,
    }
}

#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    async fn handle(&self, delivery: Delivery) -> Result<(), HandlerError>;
}

/// Consumers spawned by [`ConsumerPool::start`].
pub struct ConsumerPool {
    workers: Vec<JoinHandle<()>>,
}

impl ConsumerPool {
    /// Spawn `concurrency` consumers. They stop when `cancel` fires; an
    /// attempt in progress at that point is dropped without an outcome.
    pub fn start(
        queue: Arc<TaskQueue>,
        handler: Arc<dyn TaskHandler>,
        concurrency: usize,
        cancel: CancellationToken,
    ) -> Self {
        let concurrency = concurrency.max(1);
        let workers = (0..concurrency)
            .map(|worker| {
                tokio::spawn(consume(
                    worker,
                    Arc::clone(&queue),
                    Arc::clone(&handler),
                    cancel.clone(),
                ))
            })
            .collect();
        tracing::info!(concurrency, "Queue consumers started");
        Self { workers }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Wait for every consumer to exit.
    pub async fn join(self) {
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Queue consumer terminated abnormally");
            }
        }
    }
}

async fn consume(
    worker: usize,
    queue: Arc<TaskQueue>,
    handler: Arc<dyn TaskHandler>,
    cancel: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => break,
            item = queue.dequeue() => item,
        };

        let delivery = delivery_of(&item);
        let attempt = AssertUnwindSafe(handler.handle(delivery)).catch_unwind();

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(worker, task_id = %item.task_id, "Attempt interrupted by shutdown");
                queue.abandon(&item);
                break;
            }
            result = tokio::time::timeout(item.options.timeout, attempt) => result,
        };

        let verdict = match result {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(_panic)) => Err(HandlerError::Retry("handler panicked".into())),
            Err(_elapsed) => Err(HandlerError::Retry(format!(
                "attempt timed out after {}s",
                item.options.timeout.as_secs()
            ))),
        };

        match verdict {
            Ok(()) => {
                tracing::debug!(worker, task_id = %item.task_id, attempt = delivery.attempt(), "Task handled");
                queue.complete(&item);
            }
            Err(HandlerError::Retry(reason)) if !delivery.is_final_attempt() => {
                tracing::warn!(
                    worker,
                    task_id = %item.task_id,
                    attempt = delivery.attempt(),
                    max_retry = delivery.max_retry,
                    reason = %reason,
                    "Task attempt failed, retrying"
                );
                queue.retry(item);
            }
            Err(HandlerError::Retry(reason)) | Err(HandlerError::SkipRetry(reason)) => {
                tracing::error!(
                    worker,
                    task_id = %item.task_id,
                    attempt = delivery.attempt(),
                    reason = %reason,
                    "Task archived"
                );
                queue.archive(&item, reason);
            }
        }
    }
    tracing::debug!(worker, "Queue consumer stopped");
}
