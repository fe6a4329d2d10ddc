//! Queue error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Enqueue failed: {reason}")]
    EnqueueFailed { reason: String },

    #[error("Queue closed")]
    Closed,
}

impl QueueError {
    pub fn enqueue_failed(reason: impl Into<String>) -> Self {
        Self::EnqueueFailed {
            reason: reason.into(),
        }
    }

    /// True when the enqueue was rejected as a duplicate of an in-flight
    /// task (callers usually treat this as success).
    pub fn is_duplicate(&self) -> bool {
        matches!(self, QueueError::EnqueueFailed { reason } if reason.contains("Duplicate"))
    }
}
