//! Media error types.

use std::path::PathBuf;
use thiserror::Error;

pub type MediaResult<T> = Result<T, MediaError>;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("yt-dlp not found in PATH")]
    YtDlpNotFound,

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("FFmpeg failed (exit code {exit_code:?}): {message}")]
    FfmpegFailed {
        message: String,
        exit_code: Option<i32>,
    },

    #[error("FFprobe failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Invalid video: {0}")]
    InvalidVideo(String),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MediaError {
    pub fn ffmpeg_failed(message: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            exit_code,
        }
    }

    /// Transient failures are worth retrying: signal-terminated transcodes
    /// (no exit code), timeouts, and network-ish download failures that
    /// are not permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            MediaError::FfmpegFailed { exit_code: None, .. } => true,
            MediaError::Timeout(_) => true,
            MediaError::DownloadFailed(msg) => !is_permanent_download_failure(msg),
            _ => false,
        }
    }
}

/// Failures where retrying cannot help: the video itself is inaccessible.
/// The job should fail immediately so the submitter sees the error.
pub fn is_permanent_download_failure(message: &str) -> bool {
    let msg = message.to_lowercase();

    // Age restriction (requires login/cookies we don't have)
    if msg.contains("age") && (msg.contains("restrict") || msg.contains("verif")) {
        return true;
    }

    if msg.contains("private video") || msg.contains("video is private") {
        return true;
    }

    if msg.contains("video unavailable")
        || msg.contains("video is unavailable")
        || msg.contains("video not available")
    {
        return true;
    }

    if msg.contains("video has been removed") || msg.contains("video was deleted") {
        return true;
    }

    if msg.contains("copyright") && msg.contains("block") {
        return true;
    }

    if msg.contains("not available in your country") || msg.contains("blocked in your country") {
        return true;
    }

    // Live streams cannot be processed
    if msg.contains("live stream") || msg.contains("live event") {
        return true;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_failures_are_not_transient() {
        let err = MediaError::DownloadFailed("ERROR: Video unavailable".to_string());
        assert!(!err.is_transient());

        let err = MediaError::DownloadFailed("connection reset by peer".to_string());
        assert!(err.is_transient());
    }

    #[test]
    fn signal_terminated_ffmpeg_is_transient() {
        assert!(MediaError::ffmpeg_failed("killed", None).is_transient());
        assert!(!MediaError::ffmpeg_failed("bad input", Some(1)).is_transient());
    }
}
