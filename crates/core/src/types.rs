/// Opaque identifier for tasks, projects and shots.
pub type EntityId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Generate a fresh random identifier.
pub fn new_id() -> EntityId {
    uuid::Uuid::new_v4()
}
