//! Wire types for the inference and Google endpoints.

use serde::{Deserialize, Serialize};

/// Body of `POST /detect_multiple_files`.
#[derive(Debug, Serialize)]
pub struct DetectRequest {
    pub files_path: Vec<String>,
    pub threshold: f64,
}

#[derive(Debug, Deserialize)]
pub struct DetectResponse {
    pub results: Vec<DetectFrameResult>,
}

/// Detections for one frame as reported by the detect service.
#[derive(Debug, Deserialize)]
pub struct DetectFrameResult {
    pub frame_number: u32,
    pub confidences: Vec<NamedConfidence>,
}

#[derive(Debug, Deserialize)]
pub struct NamedConfidence {
    pub name: String,
    pub confidence: f64,
}

/// Response of the caption service's `/upload`.
#[derive(Debug, Deserialize)]
pub struct CaptionResponse {
    pub caption: String,
}

/// A recognized word with numeric-second timings.
#[derive(Debug, Clone)]
pub struct SpeechWord {
    pub word: String,
    pub start_s: f64,
    pub end_s: f64,
}

/// One result segment of a long-running recognition.
#[derive(Debug, Clone)]
pub struct SpeechSegment {
    pub transcript: String,
    pub words: Vec<SpeechWord>,
    /// End of the segment in seconds (normalized from `resultEndTime`).
    pub result_end_s: f64,
}

/// One OCR annotation for a frame: the full detected text block.
#[derive(Debug, Clone)]
pub struct OcrAnnotation {
    pub text: String,
    pub locale: String,
}
