//! Domain types shared by every storyreel crate.
//!
//! Pure data, validation and env parsing: no network or file I/O, no
//! async. The orchestration engine, the persistence layer and the HTTP
//! surface all speak in terms of the types defined here.

pub mod config;
pub mod error;
pub mod naming;
pub mod planning;
pub mod shot;
pub mod storyboard;
pub mod task;
pub mod types;
