//! Integration tests for the SQLite state store.

use std::time::Duration;

use tempfile::TempDir;
use vdesc_models::{
    FrameExtractionOutput, JobKey, JobRecord, JobStatus, Stage, StageOutput, StageStatus,
    Subscriber,
};
use vdesc_store::{StateStore, StoreError};

async fn open_store() -> (StateStore, TempDir) {
    let dir = TempDir::new().expect("temp dir");
    let store = StateStore::connect_at(dir.path().join("test.db"))
        .await
        .expect("open store");
    (store, dir)
}

fn sample_output() -> StageOutput {
    StageOutput::FrameExtraction(FrameExtractionOutput {
        fps: 25.0,
        adaptive_fps: 3.0,
        step: 25.0 / 3.0,
        num_frames: 90,
        frames_dir: "/tmp/frames".to_string(),
    })
}

#[tokio::test]
async fn upsert_is_one_row_per_key() {
    let (store, _dir) = open_store().await;
    let key = JobKey::new("vid1", "ai1");

    store.upsert_job(&JobRecord::new(key.clone(), None)).await.unwrap();
    store.upsert_job(&JobRecord::new(key.clone(), None)).await.unwrap();

    let job = store.get_job(&key).await.unwrap().expect("job exists");
    assert_eq!(job.status, JobStatus::Pending);
}

#[tokio::test]
async fn terminal_status_requires_in_progress() {
    let (store, _dir) = open_store().await;
    let key = JobKey::new("vid2", "ai1");
    store.upsert_job(&JobRecord::new(key.clone(), None)).await.unwrap();

    // pending -> done is rejected
    let err = store.set_job_status(&key, JobStatus::Done).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidTransition { .. }));

    store.set_job_status(&key, JobStatus::InProgress).await.unwrap();
    store.set_job_status(&key, JobStatus::Done).await.unwrap();
    assert_eq!(
        store.get_job_status(&key).await.unwrap(),
        Some(JobStatus::Done)
    );

    // done is terminal
    let err = store.set_job_status(&key, JobStatus::Failed).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidTransition { .. }));
}

#[tokio::test]
async fn stage_status_defaults_to_not_started() {
    let (store, _dir) = open_store().await;
    let key = JobKey::new("vid3", "ai1");

    let status = store
        .get_stage_status(&key, Stage::SpeechToText)
        .await
        .unwrap();
    assert_eq!(status, StageStatus::NotStarted);
}

#[tokio::test]
async fn module_output_write_marks_stage_done_atomically() {
    let (store, _dir) = open_store().await;
    let key = JobKey::new("vid4", "ai1");
    store.upsert_job(&JobRecord::new(key.clone(), None)).await.unwrap();

    store.put_module_output(&key, &sample_output()).await.unwrap();

    // done status implies the output row exists and re-types cleanly
    assert_eq!(
        store
            .get_stage_status(&key, Stage::FrameExtraction)
            .await
            .unwrap(),
        StageStatus::Done
    );
    let loaded = store
        .get_module_output(&key, Stage::FrameExtraction)
        .await
        .unwrap()
        .expect("output present");
    match loaded {
        StageOutput::FrameExtraction(o) => assert_eq!(o.num_frames, 90),
        other => panic!("unexpected variant: {other:?}"),
    }
}

#[tokio::test]
async fn missing_output_reads_as_none() {
    let (store, _dir) = open_store().await;
    let key = JobKey::new("vid5", "ai1");

    let output = store
        .get_module_output(&key, Stage::ObjectDetection)
        .await
        .unwrap();
    assert!(output.is_none());
}

#[tokio::test]
async fn subscribers_are_idempotent_and_ordered() {
    let (store, _dir) = open_store().await;
    let key = JobKey::new("vid6", "ai1");
    store.upsert_job(&JobRecord::new(key.clone(), None)).await.unwrap();

    let alice = Subscriber {
        user_id: "alice".into(),
        ydx_server: "https://srv".into(),
        ydx_app_host: "https://app".into(),
    };
    let bob = Subscriber {
        user_id: "bob".into(),
        ydx_server: "https://srv".into(),
        ydx_app_host: "https://app".into(),
    };

    store.add_subscriber(&key, &alice).await.unwrap();
    store.add_subscriber(&key, &alice).await.unwrap();
    store.add_subscriber(&key, &bob).await.unwrap();

    let subs = store.list_subscribers(&key).await.unwrap();
    assert_eq!(subs.len(), 2);
    assert_eq!(subs[0].user_id, "alice");
    assert_eq!(subs[1].user_id, "bob");
}

#[tokio::test]
async fn reset_job_clears_stage_progress() {
    let (store, _dir) = open_store().await;
    let key = JobKey::new("vid7", "ai1");
    store.upsert_job(&JobRecord::new(key.clone(), None)).await.unwrap();
    store.set_job_status(&key, JobStatus::InProgress).await.unwrap();
    store.put_module_output(&key, &sample_output()).await.unwrap();
    store.set_job_status(&key, JobStatus::Failed).await.unwrap();

    store.reset_job(&key, None).await.unwrap();

    assert_eq!(
        store.get_job_status(&key).await.unwrap(),
        Some(JobStatus::Pending)
    );
    assert_eq!(
        store
            .get_stage_status(&key, Stage::FrameExtraction)
            .await
            .unwrap(),
        StageStatus::NotStarted
    );
    assert!(store
        .get_module_output(&key, Stage::FrameExtraction)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn purge_removes_stale_non_done_jobs() {
    let (store, _dir) = open_store().await;

    let stale = JobKey::new("old", "ai1");
    store.upsert_job(&JobRecord::new(stale.clone(), None)).await.unwrap();
    store.set_job_status(&stale, JobStatus::InProgress).await.unwrap();
    store.put_module_output(&stale, &sample_output()).await.unwrap();

    let finished = JobKey::new("kept", "ai1");
    store.upsert_job(&JobRecord::new(finished.clone(), None)).await.unwrap();
    store.set_job_status(&finished, JobStatus::InProgress).await.unwrap();
    store.set_job_status(&finished, JobStatus::Done).await.unwrap();

    // cutoff of zero makes everything stale; done jobs survive regardless
    tokio::time::sleep(Duration::from_millis(10)).await;
    let purged = store.purge_older_than(Duration::from_secs(0)).await.unwrap();
    assert_eq!(purged, 1);

    assert!(store.get_job(&stale).await.unwrap().is_none());
    assert!(store
        .get_module_output(&stale, Stage::FrameExtraction)
        .await
        .unwrap()
        .is_none());
    assert!(store.get_job(&finished).await.unwrap().is_some());
}
