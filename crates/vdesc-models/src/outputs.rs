//! Typed module outputs: the persisted result of each stage.
//!
//! Downstream stages read only from these records, never from upstream
//! scratch files. A stage's `done` status implies its output row exists.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::stage::Stage;

/// Output of `import_video`. Metadata keys are normalized to lowercase
/// `duration`/`title` on write; this struct is the only writer.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ImportVideoOutput {
    /// Duration in seconds (post-trim when a window was requested).
    pub duration: f64,
    pub title: String,
    /// Absolute path to the downloaded (and possibly trimmed) MP4.
    pub file_path: String,
}

/// Output of `extract_audio`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExtractAudioOutput {
    pub audio_path: String,
    pub sample_rate: u32,
    pub channels: u8,
}

/// A single recognized word with its timing.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WordTiming {
    pub word: String,
    pub start_s: f64,
    pub end_s: f64,
}

/// One dialogue interval, numbered in transcript order.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DialogueTimestamp {
    pub sequence_num: u32,
    pub start_s: f64,
    pub end_s: f64,
    pub duration_s: f64,
}

/// Output of `speech_to_text`. All times are numeric seconds.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SpeechToTextOutput {
    pub words: Vec<WordTiming>,
    pub dialogue_timestamps: Vec<DialogueTimestamp>,
}

/// Output of `frame_extraction`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FrameExtractionOutput {
    /// Native frame rate of the source video.
    pub fps: f64,
    /// Sampling rate actually used (frames per second of video time).
    pub adaptive_fps: f64,
    /// Source frames per sampled frame (fps / adaptive_fps).
    pub step: f64,
    /// Number of sampled frames written.
    pub num_frames: u32,
    pub frames_dir: String,
}

impl FrameExtractionOutput {
    /// Video timestamp of sampled frame `idx`.
    pub fn timestamp_of(&self, idx: u32) -> f64 {
        if self.adaptive_fps > 0.0 {
            idx as f64 / self.adaptive_fps
        } else {
            0.0
        }
    }
}

/// One line of on-screen text surviving the watermark and duplicate filters.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OcrLine {
    pub frame_idx: u32,
    pub ts_s: f64,
    pub text: String,
}

/// Output of `ocr_extraction`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OcrExtractionOutput {
    pub filtered_ocr: Vec<OcrLine>,
    /// Text treated as background (seen in >60% of text-bearing frames).
    pub watermarks: Vec<String>,
}

/// A single detection on one frame.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Detection {
    pub label: String,
    pub confidence: f64,
}

/// All detections on one sampled frame.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FrameDetections {
    pub frame_idx: u32,
    pub detections: Vec<Detection>,
}

/// Output of `object_detection`. `labels` fixes the column order of the
/// dense per-frame confidence table consumed by scene segmentation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ObjectDetectionOutput {
    pub per_frame: Vec<FrameDetections>,
    pub labels: Vec<String>,
}

impl ObjectDetectionOutput {
    /// Dense confidence row for one frame, in `labels` order. Missing
    /// labels are 0.0.
    pub fn feature_row(&self, frame_idx: u32) -> Vec<f64> {
        let mut row = vec![0.0; self.labels.len()];
        if let Some(frame) = self.per_frame.iter().find(|f| f.frame_idx == frame_idx) {
            for det in &frame.detections {
                if let Some(pos) = self.labels.iter().position(|l| *l == det.label) {
                    if det.confidence > row[pos] {
                        row[pos] = det.confidence;
                    }
                }
            }
        }
        row
    }
}

/// A sampled frame selected as visually representative.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Keyframe {
    pub frame_idx: u32,
    pub ts_s: f64,
}

/// Output of `keyframe_selection`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct KeyframeSelectionOutput {
    pub keyframes: Vec<Keyframe>,
}

/// A caption produced for one keyframe.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FrameCaption {
    pub frame_idx: u32,
    pub ts_s: f64,
    pub caption: String,
}

/// Output of `image_captioning`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ImageCaptioningOutput {
    pub captions: Vec<FrameCaption>,
}

/// A caption with its rating score.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RatedCaption {
    pub frame_idx: u32,
    pub ts_s: f64,
    pub caption: String,
    pub rating: f64,
}

/// Detection feature row for one captioned frame: the numerical columns
/// of the detection table, in the label order fixed by object_detection.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FrameFeatures {
    pub frame_idx: u32,
    pub ts_s: f64,
    pub features: Vec<f64>,
}

/// Output of `caption_rating`. `kept` is the subset of `rated` above the
/// configured threshold; `frame_features` is the merged captions-and-
/// objects table scene segmentation slices into feature vectors.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CaptionRatingOutput {
    pub rated: Vec<RatedCaption>,
    pub kept: Vec<RatedCaption>,
    pub frame_features: Vec<FrameFeatures>,
}

/// A contiguous time interval with a textual description.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Scene {
    pub start_s: f64,
    pub end_s: f64,
    pub description: String,
}

/// Output of `scene_segmentation`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SceneSegmentationOutput {
    pub scenes: Vec<Scene>,
}

/// A summarized scene ready for the artifact.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SummarizedScene {
    pub start_s: f64,
    pub end_s: f64,
    pub text: String,
    pub scene_number: u32,
}

/// Output of `text_summarization`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TextSummarizationOutput {
    pub summarized: Vec<SummarizedScene>,
}

/// Output of `upload_to_ydx`: the composed artifact actually sent, plus
/// how many subscribers were notified.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UploadOutput {
    pub final_json: Value,
    pub subscribers_notified: u32,
}

/// A stage output together with its stage tag.
///
/// The store persists the inner payload as JSON keyed by stage name;
/// `from_stage_value` is the single place a blob is re-typed on read, so a
/// malformed row surfaces as a schema error rather than a downstream panic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "stage", content = "data", rename_all = "snake_case")]
pub enum StageOutput {
    ImportVideo(ImportVideoOutput),
    ExtractAudio(ExtractAudioOutput),
    SpeechToText(SpeechToTextOutput),
    FrameExtraction(FrameExtractionOutput),
    OcrExtraction(OcrExtractionOutput),
    ObjectDetection(ObjectDetectionOutput),
    KeyframeSelection(KeyframeSelectionOutput),
    ImageCaptioning(ImageCaptioningOutput),
    CaptionRating(CaptionRatingOutput),
    SceneSegmentation(SceneSegmentationOutput),
    TextSummarization(TextSummarizationOutput),
    UploadToYdx(UploadOutput),
}

impl StageOutput {
    /// The stage this output belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            StageOutput::ImportVideo(_) => Stage::ImportVideo,
            StageOutput::ExtractAudio(_) => Stage::ExtractAudio,
            StageOutput::SpeechToText(_) => Stage::SpeechToText,
            StageOutput::FrameExtraction(_) => Stage::FrameExtraction,
            StageOutput::OcrExtraction(_) => Stage::OcrExtraction,
            StageOutput::ObjectDetection(_) => Stage::ObjectDetection,
            StageOutput::KeyframeSelection(_) => Stage::KeyframeSelection,
            StageOutput::ImageCaptioning(_) => Stage::ImageCaptioning,
            StageOutput::CaptionRating(_) => Stage::CaptionRating,
            StageOutput::SceneSegmentation(_) => Stage::SceneSegmentation,
            StageOutput::TextSummarization(_) => Stage::TextSummarization,
            StageOutput::UploadToYdx(_) => Stage::UploadToYdx,
        }
    }

    /// Serialize the inner payload (without the stage tag).
    pub fn to_value(&self) -> serde_json::Result<Value> {
        match self {
            StageOutput::ImportVideo(o) => serde_json::to_value(o),
            StageOutput::ExtractAudio(o) => serde_json::to_value(o),
            StageOutput::SpeechToText(o) => serde_json::to_value(o),
            StageOutput::FrameExtraction(o) => serde_json::to_value(o),
            StageOutput::OcrExtraction(o) => serde_json::to_value(o),
            StageOutput::ObjectDetection(o) => serde_json::to_value(o),
            StageOutput::KeyframeSelection(o) => serde_json::to_value(o),
            StageOutput::ImageCaptioning(o) => serde_json::to_value(o),
            StageOutput::CaptionRating(o) => serde_json::to_value(o),
            StageOutput::SceneSegmentation(o) => serde_json::to_value(o),
            StageOutput::TextSummarization(o) => serde_json::to_value(o),
            StageOutput::UploadToYdx(o) => serde_json::to_value(o),
        }
    }

    /// Re-type a persisted payload for the given stage.
    pub fn from_stage_value(stage: Stage, value: Value) -> serde_json::Result<Self> {
        Ok(match stage {
            Stage::ImportVideo => StageOutput::ImportVideo(serde_json::from_value(value)?),
            Stage::ExtractAudio => StageOutput::ExtractAudio(serde_json::from_value(value)?),
            Stage::SpeechToText => StageOutput::SpeechToText(serde_json::from_value(value)?),
            Stage::FrameExtraction => StageOutput::FrameExtraction(serde_json::from_value(value)?),
            Stage::OcrExtraction => StageOutput::OcrExtraction(serde_json::from_value(value)?),
            Stage::ObjectDetection => StageOutput::ObjectDetection(serde_json::from_value(value)?),
            Stage::KeyframeSelection => {
                StageOutput::KeyframeSelection(serde_json::from_value(value)?)
            }
            Stage::ImageCaptioning => StageOutput::ImageCaptioning(serde_json::from_value(value)?),
            Stage::CaptionRating => StageOutput::CaptionRating(serde_json::from_value(value)?),
            Stage::SceneSegmentation => {
                StageOutput::SceneSegmentation(serde_json::from_value(value)?)
            }
            Stage::TextSummarization => {
                StageOutput::TextSummarization(serde_json::from_value(value)?)
            }
            Stage::UploadToYdx => StageOutput::UploadToYdx(serde_json::from_value(value)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_output_roundtrips_through_value() {
        let out = StageOutput::FrameExtraction(FrameExtractionOutput {
            fps: 25.0,
            adaptive_fps: 3.0,
            step: 25.0 / 3.0,
            num_frames: 90,
            frames_dir: "/tmp/frames".to_string(),
        });

        let value = out.to_value().unwrap();
        let back = StageOutput::from_stage_value(Stage::FrameExtraction, value).unwrap();
        match back {
            StageOutput::FrameExtraction(o) => {
                assert_eq!(o.num_frames, 90);
                assert!((o.adaptive_fps - 3.0).abs() < f64::EPSILON);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn from_stage_value_rejects_wrong_schema() {
        let value = serde_json::json!({"unexpected": true});
        assert!(StageOutput::from_stage_value(Stage::SpeechToText, value).is_err());
    }

    #[test]
    fn feature_row_is_dense_and_ordered() {
        let out = ObjectDetectionOutput {
            labels: vec!["person".into(), "dog".into(), "car".into()],
            per_frame: vec![FrameDetections {
                frame_idx: 4,
                detections: vec![
                    Detection { label: "dog".into(), confidence: 0.9 },
                    Detection { label: "person".into(), confidence: 0.5 },
                ],
            }],
        };

        assert_eq!(out.feature_row(4), vec![0.5, 0.9, 0.0]);
        assert_eq!(out.feature_row(7), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn frame_timestamp_uses_adaptive_rate() {
        let out = FrameExtractionOutput {
            fps: 30.0,
            adaptive_fps: 2.0,
            step: 15.0,
            num_frames: 60,
            frames_dir: String::new(),
        };
        assert!((out.timestamp_of(10) - 5.0).abs() < f64::EPSILON);
    }
}
