//! Intake API tests against the in-memory queue transport and a
//! temporary state store.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tempfile::TempDir;
use tower::ServiceExt;

use vdesc_api::{create_router, ApiConfig, AppState};
use vdesc_models::{JobKey, JobStatus};
use vdesc_queue::{JobQueues, MemoryTaskQueue, QueueTask};
use vdesc_store::StateStore;

async fn test_state() -> (AppState, TempDir) {
    let dir = TempDir::new().expect("temp dir");
    let store = StateStore::connect_at(dir.path().join("state.db"))
        .await
        .expect("store");

    let queues = JobQueues::new(
        Arc::new(MemoryTaskQueue::default()),
        Arc::new(MemoryTaskQueue::default()),
    );

    let state = AppState::new(ApiConfig::default(), store, queues);
    (state, dir)
}

fn submit_body(youtube_id: &str, user_id: &str, ai_user_id: &str) -> Body {
    Body::from(
        serde_json::json!({
            "youtube_id": youtube_id,
            "user_id": user_id,
            "AI_USER_ID": ai_user_id,
            "ydx_server": "https://srv",
            "ydx_app_host": "https://app"
        })
        .to_string(),
    )
}

async fn submit(state: &AppState, body: Body) -> (StatusCode, String) {
    let router = create_router(state.clone(), None);
    let response = router
        .oneshot(
            Request::post("/generate_ai_caption")
                .header("content-type", "application/json")
                .body(body)
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

#[tokio::test]
async fn fresh_submission_is_queued() {
    let (state, _dir) = test_state().await;

    let (status, body) = submit(&state, submit_body("abc", "alice", "u1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "queued");

    let key = JobKey::new("abc", "u1");
    assert_eq!(
        state.store.get_job_status(&key).await.unwrap(),
        Some(JobStatus::Pending)
    );
    assert_eq!(state.store.list_subscribers(&key).await.unwrap().len(), 1);
    assert_eq!(state.queues.general.len().await.unwrap(), 1);
    assert_eq!(state.queues.caption.len().await.unwrap(), 0);
}

#[tokio::test]
async fn duplicate_submission_subscribes_without_requeueing() {
    let (state, _dir) = test_state().await;

    submit(&state, submit_body("abc", "alice", "u1")).await;
    let (status, body) = submit(&state, submit_body("abc", "bob", "u1")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "queued-subscribed");

    let key = JobKey::new("abc", "u1");
    let subscribers = state.store.list_subscribers(&key).await.unwrap();
    assert_eq!(subscribers.len(), 2);
    // Exactly one queue entry despite two submissions
    assert_eq!(state.queues.general.len().await.unwrap(), 1);
}

#[tokio::test]
async fn missing_fields_are_rejected() {
    let (state, _dir) = test_state().await;

    let (status, _) = submit(&state, submit_body("", "alice", "u1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = submit(&state, submit_body("abc", "alice", "")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn mismatched_trim_window_is_rejected() {
    let (state, _dir) = test_state().await;

    let body = Body::from(
        serde_json::json!({
            "youtube_id": "abc",
            "user_id": "alice",
            "AI_USER_ID": "u1",
            "ydx_server": "https://srv",
            "ydx_app_host": "https://app",
            "video_start_time": "10"
        })
        .to_string(),
    );
    let (status, _) = submit(&state, body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn late_subscriber_to_done_job_takes_upload_fast_path() {
    let (state, _dir) = test_state().await;

    submit(&state, submit_body("abc", "alice", "u1")).await;

    let key = JobKey::new("abc", "u1");
    state
        .store
        .set_job_status(&key, JobStatus::InProgress)
        .await
        .unwrap();
    state.store.set_job_status(&key, JobStatus::Done).await.unwrap();

    let (status, body) = submit(&state, submit_body("abc", "carol", "u1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "queued-upload");

    // The fast path rides the caption queue
    assert_eq!(state.queues.caption.len().await.unwrap(), 1);
    let tasks = state.queues.caption.consume("t", 10, 1).await.unwrap();
    assert!(matches!(tasks[0].1, QueueTask::UploadOnly(_)));

    assert_eq!(state.store.list_subscribers(&key).await.unwrap().len(), 2);
}

#[tokio::test]
async fn failed_job_resubmission_restarts_fresh() {
    let (state, _dir) = test_state().await;

    submit(&state, submit_body("abc", "alice", "u1")).await;
    let key = JobKey::new("abc", "u1");
    state
        .store
        .set_job_status(&key, JobStatus::InProgress)
        .await
        .unwrap();
    state
        .store
        .set_job_status(&key, JobStatus::Failed)
        .await
        .unwrap();

    // Drain the original task so the dedup key does not interfere
    let tasks = state.queues.general.consume("t", 10, 5).await.unwrap();
    for (id, task) in &tasks {
        state.queues.general.ack(id).await.unwrap();
        state.queues.general.clear_dedup(task).await.unwrap();
    }

    let (status, body) = submit(&state, submit_body("abc", "alice", "u1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "queued");
    assert_eq!(
        state.store.get_job_status(&key).await.unwrap(),
        Some(JobStatus::Pending)
    );
}

#[tokio::test]
async fn backpressure_returns_503() {
    let (mut state, _dir) = test_state().await;
    state.config.queue_high_water = 0;

    // One task already queued pushes depth over the zero high-water mark
    submit(&state, submit_body("first", "alice", "u1")).await;

    let (status, _) = submit(&state, submit_body("second", "bob", "u2")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn health_endpoints_respond() {
    let (state, _dir) = test_state().await;
    let router = create_router(state, None);

    let response = router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
