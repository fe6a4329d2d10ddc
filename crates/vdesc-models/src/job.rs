//! Job identity, status machine, and subscriber records.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// YouTube video identifier (the 11-character watch id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct VideoId(pub String);

impl VideoId {
    /// Create from an existing string.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the AI user the description is produced for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct AiUserId(pub String);

impl AiUserId {
    /// Create from an existing string.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AiUserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Composite job key. At most one active job exists per key; re-submissions
/// while a job is active append a subscriber instead of forking a new job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct JobKey {
    pub video_id: VideoId,
    pub ai_user_id: AiUserId,
}

impl JobKey {
    pub fn new(video_id: impl Into<String>, ai_user_id: impl Into<String>) -> Self {
        Self {
            video_id: VideoId::new(video_id),
            ai_user_id: AiUserId::new(ai_user_id),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.video_id, self.ai_user_id)
    }
}

/// Overall job status.
///
/// Transitions: `Pending -> InProgress -> Done | Failed`. `Done` is terminal;
/// `Failed` is terminal unless externally reset by a fresh submission.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    InProgress,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }

    /// Whether the status machine permits moving to `next`.
    /// Terminal states are only left via a fresh `Pending` upsert.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::InProgress)
                | (JobStatus::InProgress, JobStatus::Done)
                | (JobStatus::InProgress, JobStatus::Failed)
        )
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "in_progress" => Some(JobStatus::InProgress),
            "done" => Some(JobStatus::Done),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Optional trim window applied at import time, in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TrimWindow {
    pub start_secs: u32,
    pub end_secs: u32,
}

/// A durable job row.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobRecord {
    pub key: JobKey,
    pub status: JobStatus,
    /// Trim window, when the caller asked for a sub-range of the video.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trim: Option<TrimWindow>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Create a fresh pending job.
    pub fn new(key: JobKey, trim: Option<TrimWindow>) -> Self {
        let now = Utc::now();
        Self {
            key,
            status: JobStatus::Pending,
            trim,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A human user waiting for a job's artifact. Multiple subscribers may
/// attach to the same (video, AI user) job; all receive the single artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Subscriber {
    pub user_id: String,
    pub ydx_server: String,
    pub ydx_app_host: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_transitions() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::InProgress));
        assert!(JobStatus::InProgress.can_transition_to(JobStatus::Done));
        assert!(JobStatus::InProgress.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Done));
        assert!(!JobStatus::Done.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::InProgress));
    }

    #[test]
    fn job_status_roundtrip() {
        for status in [
            JobStatus::Pending,
            JobStatus::InProgress,
            JobStatus::Done,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("bogus"), None);
    }

    #[test]
    fn job_key_display() {
        let key = JobKey::new("abc123", "ai-user-1");
        assert_eq!(key.to_string(), "abc123:ai-user-1");
    }
}
