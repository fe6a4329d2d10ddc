//! The twelve pipeline stages and their per-job status.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A pipeline stage. The declaration order here is the registry order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ImportVideo,
    ExtractAudio,
    SpeechToText,
    FrameExtraction,
    OcrExtraction,
    ObjectDetection,
    KeyframeSelection,
    ImageCaptioning,
    CaptionRating,
    SceneSegmentation,
    TextSummarization,
    UploadToYdx,
}

impl Stage {
    /// All stages in registry order.
    pub const ALL: [Stage; 12] = [
        Stage::ImportVideo,
        Stage::ExtractAudio,
        Stage::SpeechToText,
        Stage::FrameExtraction,
        Stage::OcrExtraction,
        Stage::ObjectDetection,
        Stage::KeyframeSelection,
        Stage::ImageCaptioning,
        Stage::CaptionRating,
        Stage::SceneSegmentation,
        Stage::TextSummarization,
        Stage::UploadToYdx,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ImportVideo => "import_video",
            Stage::ExtractAudio => "extract_audio",
            Stage::SpeechToText => "speech_to_text",
            Stage::FrameExtraction => "frame_extraction",
            Stage::OcrExtraction => "ocr_extraction",
            Stage::ObjectDetection => "object_detection",
            Stage::KeyframeSelection => "keyframe_selection",
            Stage::ImageCaptioning => "image_captioning",
            Stage::CaptionRating => "caption_rating",
            Stage::SceneSegmentation => "scene_segmentation",
            Stage::TextSummarization => "text_summarization",
            Stage::UploadToYdx => "upload_to_ydx",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Stage::ALL.iter().copied().find(|stage| stage.as_str() == s)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-(job, stage) status. Monotonic within a job lifetime, except that
/// the runner resets `Failed -> NotStarted` when retrying a resubmitted job.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    NotStarted,
    InProgress,
    Done,
    Failed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::NotStarted => "not_started",
            StageStatus::InProgress => "in_progress",
            StageStatus::Done => "done",
            StageStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_started" => Some(StageStatus::NotStarted),
            "in_progress" => Some(StageStatus::InProgress),
            "done" => Some(StageStatus::Done),
            "failed" => Some(StageStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_roundtrip() {
        for stage in Stage::ALL {
            assert_eq!(Stage::parse(stage.as_str()), Some(stage));
        }
        assert_eq!(Stage::parse("not_a_stage"), None);
    }

    #[test]
    fn registry_order_starts_with_import_and_ends_with_upload() {
        assert_eq!(Stage::ALL.first(), Some(&Stage::ImportVideo));
        assert_eq!(Stage::ALL.last(), Some(&Stage::UploadToYdx));
        assert_eq!(Stage::ALL.len(), 12);
    }
}
