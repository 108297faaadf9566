//! Row types for the `tasks` and `shots` tables.

pub mod shot;
pub mod task;
