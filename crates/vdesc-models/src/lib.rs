//! Shared data models for the audio-description pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs keyed by (video_id, ai_user_id) and their status machines
//! - The twelve pipeline stages and per-stage status
//! - Typed module outputs passed between stages
//! - Subscribers waiting on a job's artifact
//! - The final YDX artifact schema (audio clips, dialogue timestamps)
//! - Scratch artifact directory naming

pub mod artifact;
pub mod job;
pub mod outputs;
pub mod paths;
pub mod stage;

pub use artifact::{
    ArtifactDialogue, AudioClip, ClipKind, CreateUserLinksRequest, FinalDescription,
    AUDIO_CLIP_PREROLL_SECS,
};
pub use job::{AiUserId, JobKey, JobRecord, JobStatus, Subscriber, TrimWindow, VideoId};
pub use outputs::{
    CaptionRatingOutput, Detection, DialogueTimestamp, ExtractAudioOutput, FrameCaption,
    FrameDetections, FrameExtractionOutput, FrameFeatures, ImageCaptioningOutput,
    ImportVideoOutput, Keyframe,
    KeyframeSelectionOutput, ObjectDetectionOutput, OcrExtractionOutput, OcrLine, RatedCaption,
    Scene, SceneSegmentationOutput, SpeechToTextOutput, StageOutput, SummarizedScene,
    TextSummarizationOutput, UploadOutput, WordTiming,
};
pub use paths::{artifact_dir, frame_file_name, AUDIO_FILE_NAME, FRAMES_DIR_NAME, VIDEO_FILE_NAME};
pub use stage::{Stage, StageStatus};
