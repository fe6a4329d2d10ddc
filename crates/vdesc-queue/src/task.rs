//! Task types carried by the queues.
//!
//! Tasks are job references: the composite key plus routing metadata.
//! Everything else (status, subscribers, module outputs) lives in the
//! state store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vdesc_models::JobKey;

/// The two named queues. Captioning work is isolated on its own queue so
/// the caption GPU is fed by exactly one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    General,
    Caption,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::General => "general",
            QueueName::Caption => "caption",
        }
    }
}

/// Run the full twelve-stage pipeline for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineTask {
    pub key: JobKey,
    pub created_at: DateTime<Utc>,
}

impl PipelineTask {
    pub fn new(key: JobKey) -> Self {
        Self {
            key,
            created_at: Utc::now(),
        }
    }

    pub fn idempotency_key(&self) -> String {
        format!("pipeline:{}", self.key)
    }
}

/// Hand-off: run only the captioning stage for a job whose prerequisites
/// are complete, on the dedicated single-flight caption worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptioningTask {
    pub key: JobKey,
    pub created_at: DateTime<Utc>,
}

impl CaptioningTask {
    pub fn new(key: JobKey) -> Self {
        Self {
            key,
            created_at: Utc::now(),
        }
    }

    pub fn idempotency_key(&self) -> String {
        format!("caption:{}", self.key)
    }
}

/// Fast path for a subscriber arriving after the job finished: re-run only
/// the upload stage from persisted module outputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadOnlyTask {
    pub key: JobKey,
    pub created_at: DateTime<Utc>,
}

impl UploadOnlyTask {
    pub fn new(key: JobKey) -> Self {
        Self {
            key,
            created_at: Utc::now(),
        }
    }

    pub fn idempotency_key(&self) -> String {
        format!("upload:{}", self.key)
    }
}

/// Generic task wrapper for queue storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueTask {
    Pipeline(PipelineTask),
    ImageCaptioning(CaptioningTask),
    UploadOnly(UploadOnlyTask),
}

impl QueueTask {
    pub fn key(&self) -> &JobKey {
        match self {
            QueueTask::Pipeline(t) => &t.key,
            QueueTask::ImageCaptioning(t) => &t.key,
            QueueTask::UploadOnly(t) => &t.key,
        }
    }

    pub fn idempotency_key(&self) -> String {
        match self {
            QueueTask::Pipeline(t) => t.idempotency_key(),
            QueueTask::ImageCaptioning(t) => t.idempotency_key(),
            QueueTask::UploadOnly(t) => t.idempotency_key(),
        }
    }

    /// Which queue this task belongs on. Captioning tasks and the
    /// upload-only fast path go to the caption queue; everything else to
    /// general.
    pub fn route(&self) -> QueueName {
        match self {
            QueueTask::Pipeline(_) => QueueName::General,
            QueueTask::ImageCaptioning(_) | QueueTask::UploadOnly(_) => QueueName::Caption,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_by_task_type() {
        let key = JobKey::new("vid", "ai");
        assert_eq!(
            QueueTask::Pipeline(PipelineTask::new(key.clone())).route(),
            QueueName::General
        );
        assert_eq!(
            QueueTask::ImageCaptioning(CaptioningTask::new(key.clone())).route(),
            QueueName::Caption
        );
        assert_eq!(
            QueueTask::UploadOnly(UploadOnlyTask::new(key)).route(),
            QueueName::Caption
        );
    }

    #[test]
    fn serde_roundtrip_preserves_task_type() {
        let task = QueueTask::Pipeline(PipelineTask::new(JobKey::new("abc", "u1")));
        let json = serde_json::to_string(&task).expect("serialize");
        let back: QueueTask = serde_json::from_str(&json).expect("deserialize");
        match back {
            QueueTask::Pipeline(t) => assert_eq!(t.key, JobKey::new("abc", "u1")),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn idempotency_keys_are_distinct_per_type() {
        let key = JobKey::new("abc", "u1");
        let a = QueueTask::Pipeline(PipelineTask::new(key.clone())).idempotency_key();
        let b = QueueTask::ImageCaptioning(CaptioningTask::new(key.clone())).idempotency_key();
        let c = QueueTask::UploadOnly(UploadOnlyTask::new(key)).idempotency_key();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }
}
