//! Single-flight enforcement: concurrent captioning work serializes on
//! the one caption permit, end to end through the real adapter.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tokio::sync::watch;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vdesc_models::{
    JobKey, JobRecord, Keyframe, KeyframeSelectionOutput, Stage, StageOutput,
};
use vdesc_services::{
    GoogleClient, GoogleConfig, InferenceClient, PoolConfig, ServiceConfig, ServiceKind,
    ServicePool,
};
use vdesc_store::StateStore;
use vdesc_worker::{stages, PipelineServices, StageInput, WorkerConfig};

const CAPTION_LATENCY: Duration = Duration::from_millis(150);

async fn caption_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(CAPTION_LATENCY)
                .set_body_json(serde_json::json!({"caption": "a person stands"})),
        )
        .mount(&server)
        .await;
    server
}

async fn services_with_caption(server: &MockServer, dir: &TempDir) -> Arc<PipelineServices> {
    let mut pool_config = PoolConfig::default();
    pool_config.services = vec![ServiceConfig {
        kind: ServiceKind::Caption,
        base_url: server.uri(),
        endpoint: "/upload".to_string(),
        max_concurrency: 1,
        token: "test-token".to_string(),
    }];

    let store = StateStore::connect_at(dir.path().join("state.db"))
        .await
        .expect("store");

    let mut config = WorkerConfig::default();
    config.artifacts_root = dir.path().join("artifacts");
    config.service_deadline = Duration::from_secs(5);

    // The sender drops here; the receiver keeps reporting false
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    Arc::new(PipelineServices {
        config,
        store,
        pool: Arc::new(ServicePool::new(pool_config).expect("pool")),
        inference: Arc::new(InferenceClient::new(Duration::from_secs(5)).expect("client")),
        google: Arc::new(
            GoogleClient::with_static_token(GoogleConfig::default(), "test").expect("google"),
        ),
        http: reqwest::Client::new(),
        cancel: cancel_rx,
    })
}

/// Stage input with one keyframe whose frame file exists on disk.
async fn captioning_input(services: &PipelineServices, video: &str) -> StageInput {
    let key = JobKey::new(video, "ai1");
    let job = JobRecord::new(key, None);
    let mut input = StageInput::new(job, &services.config.artifacts_root);

    let frames_dir = input.frames_dir();
    tokio::fs::create_dir_all(&frames_dir).await.unwrap();
    tokio::fs::write(frames_dir.join("frame_0.jpg"), b"\xFF\xD8fake")
        .await
        .unwrap();

    input.upstream.insert(
        Stage::KeyframeSelection,
        StageOutput::KeyframeSelection(KeyframeSelectionOutput {
            keyframes: vec![Keyframe {
                frame_idx: 0,
                ts_s: 0.0,
            }],
        }),
    );
    input
}

#[tokio::test]
async fn concurrent_captioning_jobs_serialize_on_the_single_permit() {
    let server = caption_server().await;
    let dir = TempDir::new().unwrap();
    let services = services_with_caption(&server, &dir).await;

    let input_a = captioning_input(&services, "vidA").await;
    let input_b = captioning_input(&services, "vidB").await;

    let start = Instant::now();
    let (a, b) = tokio::join!(
        stages::run_stage(Stage::ImageCaptioning, &services, &input_a),
        stages::run_stage(Stage::ImageCaptioning, &services, &input_b),
    );
    let elapsed = start.elapsed();

    a.expect("job A captions");
    b.expect("job B captions");

    // With one permit the two requests cannot overlap: total time is at
    // least two full caption latencies.
    assert!(
        elapsed >= CAPTION_LATENCY * 2,
        "requests overlapped: {elapsed:?}"
    );
}

#[tokio::test]
async fn unk_captions_are_skipped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"caption": "a <unk> near a <unk>"})),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let services = services_with_caption(&server, &dir).await;
    let input = captioning_input(&services, "vidC").await;

    let output = stages::run_stage(Stage::ImageCaptioning, &services, &input)
        .await
        .expect("stage succeeds");

    match output {
        StageOutput::ImageCaptioning(o) => assert!(o.captions.is_empty()),
        other => panic!("unexpected output: {other:?}"),
    }
}

#[tokio::test]
async fn caption_service_5xx_surfaces_as_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let services = services_with_caption(&server, &dir).await;
    let input = captioning_input(&services, "vidD").await;

    let err = stages::run_stage(Stage::ImageCaptioning, &services, &input)
        .await
        .expect_err("stage fails");
    assert!(err.is_transient());
}
