//! Store error types.

use thiserror::Error;
use vdesc_models::{JobKey, JobStatus, Stage};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Job not found: {0}")]
    JobNotFound(JobKey),

    #[error("Invalid status transition for {key}: {from} -> {to}")]
    InvalidTransition {
        key: JobKey,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Malformed module output for {key} stage {stage}: {reason}")]
    MalformedOutput {
        key: JobKey,
        stage: Stage,
        reason: String,
    },

    #[error("Corrupt row for {key}: {reason}")]
    CorruptRow { key: JobKey, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
