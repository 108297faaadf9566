//! Task orchestration engine.
//!
//! Tasks travel from the queue through a fixed pipeline:
//!
//! 1. [`consumer::TaskConsumer`] claims the task and hands it to the
//!    [`dispatcher::Dispatcher`], which submits a job to the worker.
//! 2. [`poll::Poller`] follows the job until it ends, cancellable through
//!    the [`registry::CancellationRegistry`].
//! 3. [`router::ResultRouter`] stores the artifact and updates the shot.
//! 4. [`resolver::DependencyResolver`] releases or cascades to the tasks
//!    waiting on it.
//!
//! [`orchestrator::Orchestrator`] owns all of it and is what callers use.

pub mod config;
pub mod consumer;
pub mod dispatcher;
pub mod error;
pub mod orchestrator;
pub mod poll;
pub mod registry;
pub mod resolver;
pub mod router;
pub mod status;
pub mod tracker;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use config::{EngineConfig, PollConfig};
pub use error::{DispatchError, PipelineError, PollError, RouteError};
pub use orchestrator::{EngineDeps, EngineHandle, Orchestrator, RecoveryReport};
