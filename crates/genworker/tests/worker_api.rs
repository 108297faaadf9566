//! Worker client against a local axum server standing in for the worker.

use assert_matches::assert_matches;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use storyreel_genworker::{
    ArtifactFetcher, FetchError, GenerationWorker, HttpFetcher, JobState, WorkerApi,
    WorkerApiError,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Serve `router` on an ephemeral port and return its base URL.
async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn submit_router(status: StatusCode, body: Value) -> Router {
    Router::new().route(
        "/v1/generate",
        post(move |Json(_req): Json<Value>| {
            let body = body.clone();
            async move { (status, Json(body)) }
        }),
    )
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_accepts_202_with_job_id_field() {
    let url = serve(submit_router(StatusCode::ACCEPTED, json!({"job_id": "j-202"}))).await;
    let api = WorkerApi::new(url);

    let id = api.submit(&json!({"type": "generate_shot"})).await.unwrap();
    assert_eq!(id, "j-202");
}

#[tokio::test]
async fn submit_accepts_201_with_id_field() {
    let url = serve(submit_router(StatusCode::CREATED, json!({"id": "j-201"}))).await;
    let id = WorkerApi::new(url).submit(&json!({})).await.unwrap();
    assert_eq!(id, "j-201");
}

#[tokio::test]
async fn submit_rejects_other_statuses() {
    let url = serve(submit_router(
        StatusCode::SERVICE_UNAVAILABLE,
        json!({"error": "overloaded"}),
    ))
    .await;

    let err = WorkerApi::new(url).submit(&json!({})).await.unwrap_err();
    assert_matches!(err, WorkerApiError::Status { status: 503, ref body } if body == "overloaded");
}

#[tokio::test]
async fn submit_without_job_id_is_an_error() {
    let url = serve(submit_router(StatusCode::OK, json!({"queued": true}))).await;
    let err = WorkerApi::new(url).submit(&json!({})).await.unwrap_err();
    assert_matches!(err, WorkerApiError::MissingJobId);
}

#[tokio::test]
async fn submit_to_unreachable_worker_is_transport_error() {
    // Bind then drop to get a port nothing listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = WorkerApi::new(format!("http://{addr}"))
        .submit(&json!({}))
        .await
        .unwrap_err();
    assert!(err.is_transport());
}

// ---------------------------------------------------------------------------
// Status and cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn job_status_parses_document() {
    let router = Router::new().route(
        "/v1/jobs/{id}",
        get(|Path(id): Path<String>| async move {
            Json(json!({
                "id": id,
                "type": "generate_shot",
                "status": "completed",
                "progress": 100,
                "result": {"resource_type": "image", "resource_id": "r", "resource_url": "http://w/r.png"},
                "startedAt": "2024-05-01T10:00:00Z",
                "finishedAt": ""
            }))
        }),
    );
    let url = serve(router).await;

    let job = WorkerApi::new(url).job_status("j-9").await.unwrap();
    assert_eq!(job.id, "j-9");
    assert_eq!(job.state(), JobState::Succeeded);
    assert!(job.started_at.is_some());
    assert!(job.finished_at.is_none());
}

#[tokio::test]
async fn job_ids_with_reserved_characters_reach_the_right_job() {
    let router = Router::new().route(
        "/v1/jobs/{id}",
        get(|Path(id): Path<String>| async move {
            Json(json!({"id": id, "status": "running", "progress": 5}))
        })
        .delete(|Path(id): Path<String>| async move {
            if id == "render/2?priority=high" {
                StatusCode::OK
            } else {
                StatusCode::NOT_FOUND
            }
        }),
    );
    let url = serve(router).await;
    let api = WorkerApi::new(url);

    let job = api.job_status("render/2?priority=high").await.unwrap();
    assert_eq!(job.id, "render/2?priority=high");
    assert_eq!(job.state(), JobState::Running);
    api.cancel_job("render/2?priority=high").await.unwrap();
}

#[tokio::test]
async fn cancel_job_reports_error_body() {
    let router = Router::new().route(
        "/v1/jobs/{id}",
        delete(|Path(id): Path<String>| async move {
            if id == "known" {
                (StatusCode::OK, Json(json!({"cancelled": true})))
            } else {
                (StatusCode::NOT_FOUND, Json(json!({"error": "job not found"})))
            }
        }),
    );
    let url = serve(router).await;
    let api = WorkerApi::new(url);

    api.cancel_job("known").await.unwrap();
    let err = api.cancel_job("missing").await.unwrap_err();
    assert_matches!(err, WorkerApiError::Status { status: 404, ref body } if body == "job not found");
}

// ---------------------------------------------------------------------------
// Artifact download
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fetch_streams_body_and_rejects_non_200() {
    let router = Router::new()
        .route("/files/ok.png", get(|| async { b"PNGDATA".to_vec() }))
        .route(
            "/files/gone.png",
            get(|| async { (StatusCode::NOT_FOUND, "gone") }),
        );
    let url = serve(router).await;
    let fetcher = HttpFetcher::default();

    let artifact = fetcher.fetch(&format!("{url}/files/ok.png")).await.unwrap();
    assert_eq!(artifact.size, Some(7));
    assert_eq!(artifact.into_bytes().await.unwrap(), b"PNGDATA");

    let err = fetcher
        .fetch(&format!("{url}/files/gone.png"))
        .await
        .err()
        .unwrap();
    assert_matches!(err, FetchError::Status(404));
}
