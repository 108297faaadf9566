//! WebSocket streaming of task events.

mod task_events;

pub use task_events::task_events_ws;
