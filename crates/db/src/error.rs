use storyreel_core::error::CoreError;

/// Errors returned by [`TaskStore`](crate::TaskStore) and
/// [`ShotStore`](crate::ShotStore) implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A status write that the transition table does not allow.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid record: {0}")]
    Invalid(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<CoreError> for StoreError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            CoreError::Conflict(msg) => Self::Conflict(msg),
            CoreError::Validation(msg) | CoreError::Internal(msg) => Self::Invalid(msg),
        }
    }
}
