//! Signed downloads for objects kept by the local storage backend.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Deserialize;
use storyreel_cloud::StorageError;
use storyreel_core::naming::content_type_for_key;
use tokio_util::io::ReaderStream;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Signature issued with the URL by the local storage provider.
#[derive(Debug, Deserialize)]
pub struct SignedQuery {
    pub expires: i64,
    pub signature: String,
}

/// GET /files/{*key}
///
/// Stream the object when the signature matches and has not expired.
pub async fn download(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<SignedQuery>,
) -> AppResult<Response> {
    let Some(local) = state.local_storage.as_ref() else {
        return Err(StorageError::NotFound(key).into());
    };

    if !local.verify(&key, query.expires, &query.signature, Utc::now()) {
        tracing::debug!(key = %key, "Rejected file request with bad or expired signature");
        return Err(AppError::Forbidden(
            "Invalid or expired signature".to_string(),
        ));
    }

    let file = local.open(&key).await?;
    let len = file.metadata().await.map_err(StorageError::Io)?.len();
    let body = Body::from_stream(ReaderStream::new(file));

    Ok((
        [
            (CONTENT_TYPE, content_type_for_key(&key).to_string()),
            (CONTENT_LENGTH, len.to_string()),
            (CACHE_CONTROL, "private, max-age=300".to_string()),
        ],
        body,
    )
        .into_response())
}
