//! In-process task queue.
//!
//! Carries task ids, not payloads: the handler loads the task record itself.
//! Each enqueued id carries its own retry bound, per-attempt timeout and
//! result retention ([`EnqueueOptions`]). A fixed-size [`ConsumerPool`]
//! drains the queue and applies the handler's retry decision
//! ([`HandlerError`]).

pub mod error;
pub mod pool;
pub mod queue;

pub use error::{HandlerError, QueueError};
pub use pool::{ConsumerPool, Delivery, TaskHandler};
pub use queue::{EnqueueOptions, OutcomeState, QueueStats, TaskOutcome, TaskQueue};
