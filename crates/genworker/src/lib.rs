//! Client for the remote generation worker.
//!
//! The worker exposes a small HTTP/JSON protocol:
//!
//! | Method | Path | Purpose |
//! |---|---|---|
//! | `POST` | `/v1/generate` | submit a job, returns `{"id"}` or `{"job_id"}` |
//! | `GET` | `/v1/jobs/{id}` | job status, progress and result locator |
//! | `DELETE` | `/v1/jobs/{id}` | cancel a job |
//!
//! [`GenerationWorker`] is the seam the engine depends on; [`WorkerApi`] is
//! the reqwest implementation. [`HttpFetcher`] downloads finished
//! artifacts from the URLs the worker reports.

pub mod api;
pub mod fetch;
pub mod job;
pub mod timestamps;

pub use api::{GenerationWorker, WorkerApi, WorkerApiError};
pub use fetch::{Artifact, ArtifactFetcher, FetchError, HttpFetcher};
pub use job::{JobState, JobStatusResponse};
