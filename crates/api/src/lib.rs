//! HTTP surface of the storyreel engine.
//!
//! Task creation, inspection and cancellation, project planning, a
//! per-task WebSocket event stream, and the `/files` route that serves
//! objects written by the local storage backend.

pub mod config;
pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
pub mod routes;
pub mod state;
pub mod ws;
