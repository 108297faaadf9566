//! Repository structs: zero-sized types whose async methods take a pool or
//! connection and run plain SQL.

pub mod shot_repo;
pub mod task_repo;

pub use shot_repo::ShotRepo;
pub use task_repo::TaskRepo;
