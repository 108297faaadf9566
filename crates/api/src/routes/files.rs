use axum::routing::get;
use axum::Router;

use crate::handlers::files;
use crate::state::AppState;

/// Signed downloads of locally stored artifacts, mounted at root level.
///
/// ```text
/// GET    /files/{*key}?expires=&signature=   -> download
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/files/{*key}", get(files::download))
}
