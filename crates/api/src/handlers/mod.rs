pub mod files;
pub mod projects;
pub mod shots;
pub mod tasks;

use serde::Deserialize;

/// Query string accepted by the cancel endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct CancelParams {
    /// Written as the cancelled task's message.
    pub reason: Option<String>,
}
