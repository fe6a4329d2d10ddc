//! Integration tests for the inference and Google clients against mock
//! HTTP servers.

use std::time::Duration;

use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vdesc_services::{
    GoogleClient, GoogleConfig, InferenceClient, PoolConfig, ServiceConfig, ServiceError,
    ServiceKind, ServicePool,
};

fn pool_with(kind: ServiceKind, base_url: &str, endpoint: &str) -> ServicePool {
    let mut config = PoolConfig::default();
    config.services = vec![ServiceConfig {
        kind,
        base_url: base_url.to_string(),
        endpoint: endpoint.to_string(),
        max_concurrency: if kind == ServiceKind::Caption { 1 } else { 2 },
        token: "test-token".to_string(),
    }];
    ServicePool::new(config).unwrap()
}

#[tokio::test]
async fn detect_batch_roundtrip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/detect_multiple_files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "results": [
                {"frame_number": 0, "confidences": [{"name": "person", "confidence": 0.91}]},
                {"frame_number": 1, "confidences": []}
            ]
        })))
        .mount(&server)
        .await;

    let pool = pool_with(ServiceKind::Detect, &server.uri(), "/detect_multiple_files");
    let handle = pool
        .acquire(ServiceKind::Detect, Duration::from_secs(1))
        .await
        .unwrap();

    let client = InferenceClient::new(Duration::from_secs(5)).unwrap();
    let results = client
        .detect_files(&handle, vec!["frame_0.jpg".into(), "frame_1.jpg".into()], 0.25)
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].confidences[0].name, "person");
}

#[tokio::test]
async fn rating_parses_wrapped_score_and_rejects_4xx() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api"))
        .respond_with(ResponseTemplate::new(200).set_body_string("['0.67']"))
        .mount(&server)
        .await;

    let pool = pool_with(ServiceKind::Rating, &server.uri(), "/api");
    let handle = pool
        .acquire(ServiceKind::Rating, Duration::from_secs(1))
        .await
        .unwrap();

    let client = InferenceClient::new(Duration::from_secs(5)).unwrap();
    let score = client
        .rate_caption(&handle, "http://imgs/frame_3.jpg", "a dog runs")
        .await
        .unwrap();
    assert!((score - 0.67).abs() < 1e-9);

    // 4xx is deterministic: no retry
    let bad_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad caption"))
        .mount(&bad_server)
        .await;
    let pool = pool_with(ServiceKind::Rating, &bad_server.uri(), "/api");
    let handle = pool
        .acquire(ServiceKind::Rating, Duration::from_secs(1))
        .await
        .unwrap();
    let err = client
        .rate_caption(&handle, "http://imgs/frame_3.jpg", "a dog runs")
        .await
        .unwrap_err();
    assert!(!err.is_transient());
}

#[tokio::test]
async fn five_hundred_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/detect_multiple_files"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let pool = pool_with(ServiceKind::Detect, &server.uri(), "/detect_multiple_files");
    let handle = pool
        .acquire(ServiceKind::Detect, Duration::from_secs(1))
        .await
        .unwrap();

    let client = InferenceClient::new(Duration::from_secs(5)).unwrap();
    let err = client
        .detect_files(&handle, vec!["frame_0.jpg".into()], 0.25)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::RequestFailed { status: 503, .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn health_probe_accepts_405() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;

    let pool = pool_with(ServiceKind::Caption, &server.uri(), "/upload");
    assert!(pool.probe(ServiceKind::Caption).await);
    assert!(pool.is_healthy(ServiceKind::Caption));
}

#[tokio::test]
async fn speech_recognition_uploads_polls_and_normalizes_times() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path_regex(r"^/upload/storage/v1/b/test-bucket/o$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"name": "a.flac"})))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/speech:longrunningrecognize"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"name": "op-123"})),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/operations/op-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "done": true,
            "response": {
                "results": [{
                    "alternatives": [{
                        "transcript": "hello world",
                        "words": [
                            {"startTime": "0s", "endTime": "0.400s", "word": "hello"},
                            {"startTime": "0.400s", "endTime": "1.100s", "word": "world"}
                        ]
                    }],
                    "resultEndTime": "1.100s"
                }]
            }
        })))
        .mount(&server)
        .await;

    let config = GoogleConfig {
        bucket: "test-bucket".to_string(),
        storage_base: server.uri(),
        speech_base: server.uri(),
        vision_base: server.uri(),
        timeout: Duration::from_secs(5),
    };
    let client = GoogleClient::with_static_token(config, "tok").unwrap();

    let uri = client.upload_blob("a.flac", vec![1, 2, 3]).await.unwrap();
    assert_eq!(uri, "gs://test-bucket/a.flac");

    let op = client.start_recognition(&uri, 48000, 2).await.unwrap();
    let segments = client
        .poll_recognition(&op, Duration::from_millis(10), Duration::from_secs(1))
        .await
        .unwrap();

    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].words.len(), 2);
    assert!((segments[0].result_end_s - 1.1).abs() < 1e-9);
    assert!((segments[0].words[1].start_s - 0.4).abs() < 1e-9);
}

#[tokio::test]
async fn vision_text_detection_returns_annotations() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/images:annotate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "responses": [{
                "textAnnotations": [
                    {"description": "ACME CORP\nSALE", "locale": "en"},
                    {"description": "ACME", "locale": "en"}
                ]
            }]
        })))
        .mount(&server)
        .await;

    let config = GoogleConfig {
        bucket: "test-bucket".to_string(),
        storage_base: server.uri(),
        speech_base: server.uri(),
        vision_base: server.uri(),
        timeout: Duration::from_secs(5),
    };
    let client = GoogleClient::with_static_token(config, "tok").unwrap();

    let annotations = client.detect_text(&[0xFF, 0xD8]).await.unwrap();
    assert_eq!(annotations.len(), 2);
    assert_eq!(annotations[0].text, "ACME CORP\nSALE");
}
