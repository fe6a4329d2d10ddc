//! Worker error taxonomy.
//!
//! Adapters surface a [`StageError`] whose kind drives the runner's
//! retry-vs-fail decision. Nothing above the runner observes inner
//! errors; all failures leave the runner as `JobFailed`.

use thiserror::Error;
use vdesc_models::{JobKey, Stage};

pub type StageResult<T> = Result<T, StageError>;
pub type WorkerResult<T> = Result<T, WorkerError>;

/// A stage-level failure with its retry classification.
#[derive(Debug, Error)]
pub enum StageError {
    /// Worth retrying: network timeout, 5xx, unhealthy service,
    /// signal-terminated transcoder.
    #[error("{0}")]
    Transient(String),

    /// Deterministic: 4xx, malformed input, schema mismatch. Never retried.
    #[error("{0}")]
    Fatal(String),

    /// A should-be-impossible state, e.g. a `done` stage without its
    /// module output. The job fails and artifacts are preserved for
    /// forensics.
    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl StageError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, StageError::Transient(_))
    }

    pub fn is_invariant(&self) -> bool {
        matches!(self, StageError::Invariant(_))
    }
}

impl From<vdesc_media::MediaError> for StageError {
    fn from(e: vdesc_media::MediaError) -> Self {
        if e.is_transient() {
            StageError::Transient(e.to_string())
        } else {
            StageError::Fatal(e.to_string())
        }
    }
}

impl From<vdesc_services::ServiceError> for StageError {
    fn from(e: vdesc_services::ServiceError) -> Self {
        if e.is_transient() {
            StageError::Transient(e.to_string())
        } else {
            StageError::Fatal(e.to_string())
        }
    }
}

impl From<vdesc_store::StoreError> for StageError {
    fn from(e: vdesc_store::StoreError) -> Self {
        match e {
            vdesc_store::StoreError::MalformedOutput { .. }
            | vdesc_store::StoreError::CorruptRow { .. } => StageError::Invariant(e.to_string()),
            // Store hiccups (pool contention, transient IO) are retryable
            other => StageError::Transient(other.to_string()),
        }
    }
}

impl From<std::io::Error> for StageError {
    fn from(e: std::io::Error) -> Self {
        StageError::Fatal(format!("IO error: {e}"))
    }
}

impl From<serde_json::Error> for StageError {
    fn from(e: serde_json::Error) -> Self {
        StageError::Fatal(format!("JSON error: {e}"))
    }
}

/// Errors surfacing from the runner and executor.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job {key} failed at {stage}: {reason}")]
    JobFailed {
        key: JobKey,
        stage: Stage,
        reason: String,
    },

    #[error("Job {0} not found")]
    JobNotFound(JobKey),

    #[error("Job {0} cancelled")]
    Cancelled(JobKey),

    #[error("Store error: {0}")]
    Store(#[from] vdesc_store::StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] vdesc_queue::QueueError),

    #[error("Service error: {0}")]
    Service(#[from] vdesc_services::ServiceError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl WorkerError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn job_failed(key: JobKey, stage: Stage, reason: impl Into<String>) -> Self {
        Self::JobFailed {
            key,
            stage,
            reason: reason.into(),
        }
    }

    /// Infrastructure errors (store/queue) may succeed on redelivery;
    /// `JobFailed` is terminal for the job itself.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkerError::Store(_) | WorkerError::Queue(_) | WorkerError::Service(_))
    }
}
