use storyreel_core::types::EntityId;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The id is already waiting or being handled.
    #[error("task {0} is already queued")]
    AlreadyQueued(EntityId),

    #[error("queue is closed")]
    Closed,
}

/// A handler's verdict on a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    /// Deliver again, up to the task's retry bound.
    #[error("retryable: {0}")]
    Retry(String),

    /// Give up now; further attempts cannot succeed.
    #[error("not retryable: {0}")]
    SkipRetry(String),
}
