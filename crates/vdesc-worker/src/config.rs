//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent stage runners across distinct jobs (W).
    pub max_workers: usize,
    /// Maximum stages running in parallel inside one job.
    pub max_stage_parallel: usize,
    /// Retries after the first attempt of a stage.
    pub max_retries: u32,
    /// Base retry delay; attempt N waits N x this.
    pub retry_delay: Duration,
    /// Delete a failed job's scratch directory.
    pub cleanup_on_failure: bool,
    /// Default frame sampling rate before adaptation.
    pub frame_extraction_rate: u32,
    /// Minimum rating a caption must exceed to be kept.
    pub caption_rating_threshold: f64,
    /// Confidence floor passed to the detect service.
    pub detect_confidence_threshold: f64,
    /// Frame paths per detect request.
    pub detect_batch_size: usize,
    /// Root of per-job scratch directories.
    pub artifacts_root: PathBuf,
    /// Wall-clock bound on the audio transcode.
    pub audio_timeout_secs: u64,
    /// Deadline for acquiring a service slot.
    pub service_deadline: Duration,
    /// Poll cadence for long-running recognition.
    pub stt_poll_interval: Duration,
    /// Give up on a recognition operation after this long.
    pub stt_max_wait: Duration,
    /// Concurrent OCR requests per job.
    pub ocr_parallelism: usize,
    /// How often the cleanup supervisor wakes up.
    pub cleanup_interval: Duration,
    /// State rows of unfinished jobs older than this are purged.
    pub cleanup_max_age: Duration,
    /// How often to scan for orphaned pending tasks.
    pub claim_interval: Duration,
    /// Minimum idle time before an unacked task is reclaimed.
    pub claim_min_idle: Duration,
    /// Whether upload_to_ydx actually posts to the destination.
    pub upload_enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            max_stage_parallel: 2,
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            cleanup_on_failure: true,
            frame_extraction_rate: 3,
            caption_rating_threshold: 0.5,
            detect_confidence_threshold: 0.25,
            detect_batch_size: 100,
            artifacts_root: PathBuf::from("data/artifacts"),
            audio_timeout_secs: 180,
            service_deadline: Duration::from_secs(60),
            stt_poll_interval: Duration::from_secs(10),
            stt_max_wait: Duration::from_secs(1800),
            ocr_parallelism: 8,
            cleanup_interval: Duration::from_secs(3600),
            cleanup_max_age: Duration::from_secs(24 * 3600),
            claim_interval: Duration::from_secs(60),
            claim_min_idle: Duration::from_secs(1800),
            upload_enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let artifacts_root = match std::env::var("ARTIFACTS_ROOT") {
            Ok(path) => PathBuf::from(path),
            Err(_) => {
                let env = std::env::var("CURRENT_ENV").unwrap_or_default();
                if env == "production" {
                    PathBuf::from("/var/lib/vdesc/artifacts")
                } else {
                    defaults.artifacts_root.clone()
                }
            }
        };

        Self {
            max_workers: env_parse("PIPELINE_MAX_WORKERS", defaults.max_workers),
            max_stage_parallel: env_parse("PIPELINE_MAX_STAGE_PARALLEL", defaults.max_stage_parallel),
            max_retries: env_parse("PIPELINE_MAX_RETRIES", defaults.max_retries),
            retry_delay: Duration::from_secs(env_parse("PIPELINE_RETRY_DELAY", 5)),
            cleanup_on_failure: std::env::var("CLEANUP_ON_FAILURE")
                .map(|s| s.to_lowercase() != "false")
                .unwrap_or(defaults.cleanup_on_failure),
            frame_extraction_rate: env_parse("FRAME_EXTRACTION_RATE", defaults.frame_extraction_rate),
            caption_rating_threshold: env_parse(
                "CAPTION_RATING_THRESHOLD",
                defaults.caption_rating_threshold,
            ),
            detect_confidence_threshold: env_parse(
                "DETECT_CONFIDENCE_THRESHOLD",
                defaults.detect_confidence_threshold,
            ),
            detect_batch_size: env_parse("DETECT_BATCH_SIZE", defaults.detect_batch_size),
            artifacts_root,
            audio_timeout_secs: env_parse("AUDIO_TIMEOUT_SECS", defaults.audio_timeout_secs),
            service_deadline: Duration::from_secs(env_parse("SERVICE_DEADLINE_SECS", 60)),
            stt_poll_interval: Duration::from_secs(env_parse("STT_POLL_INTERVAL_SECS", 10)),
            stt_max_wait: Duration::from_secs(env_parse("STT_MAX_WAIT_SECS", 1800)),
            ocr_parallelism: env_parse("OCR_PARALLELISM", defaults.ocr_parallelism),
            cleanup_interval: Duration::from_secs(env_parse("CLEANUP_INTERVAL_SECS", 3600)),
            cleanup_max_age: Duration::from_secs(env_parse("CLEANUP_MAX_AGE_SECS", 24 * 3600)),
            claim_interval: Duration::from_secs(env_parse("CLAIM_INTERVAL_SECS", 60)),
            claim_min_idle: Duration::from_secs(env_parse("CLAIM_MIN_IDLE_SECS", 1800)),
            upload_enabled: std::env::var("UPLOAD_TO_SERVER")
                .map(|s| s.to_lowercase() != "false")
                .unwrap_or(defaults.upload_enabled),
        }
    }
}

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
