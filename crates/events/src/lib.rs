//! Task lifecycle events.
//!
//! The engine publishes a [`TaskEvent`] on every status write and every
//! mirrored progress update. Subscribers (the WebSocket endpoint, logs)
//! receive them through the in-process [`EventBus`].

pub mod bus;

pub use bus::{EventBus, TaskEvent, TaskEventKind};
