//! Shared context handed to stage adapters.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;

use vdesc_models::{
    artifact_dir, CaptionRatingOutput, ExtractAudioOutput, FrameExtractionOutput,
    ImageCaptioningOutput, ImportVideoOutput, JobRecord, KeyframeSelectionOutput,
    ObjectDetectionOutput, OcrExtractionOutput, SceneSegmentationOutput, SpeechToTextOutput,
    Stage, StageOutput, TextSummarizationOutput,
};
use vdesc_services::{GoogleClient, InferenceClient, ServicePool};
use vdesc_store::StateStore;

use crate::config::WorkerConfig;
use crate::error::{StageError, StageResult};

/// Process-wide collaborators, injected into every adapter invocation.
/// No module-global clients anywhere.
pub struct PipelineServices {
    pub config: WorkerConfig,
    pub store: StateStore,
    pub pool: Arc<ServicePool>,
    pub inference: Arc<InferenceClient>,
    pub google: Arc<GoogleClient>,
    /// Plain client for destination (YDX) egress.
    pub http: reqwest::Client,
    /// Cooperative cancellation, checked at stage boundaries and inside
    /// long-running adapters.
    pub cancel: watch::Receiver<bool>,
}

impl PipelineServices {
    /// Whether cancellation has been requested.
    pub fn cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

/// Per-invocation input: the job, its scratch directory, and the upstream
/// outputs declared in the registry. Adapters read only from here, never
/// from other stages' scratch files.
pub struct StageInput {
    pub job: JobRecord,
    pub artifacts_dir: PathBuf,
    pub upstream: HashMap<Stage, StageOutput>,
}

impl StageInput {
    pub fn new(job: JobRecord, artifacts_root: &std::path::Path) -> Self {
        let artifacts_dir = artifact_dir(artifacts_root, &job.key, job.trim);
        Self {
            job,
            artifacts_dir,
            upstream: HashMap::new(),
        }
    }

    fn missing(stage: Stage) -> StageError {
        StageError::invariant(format!("missing upstream output for {stage}"))
    }

    pub fn import_video(&self) -> StageResult<&ImportVideoOutput> {
        match self.upstream.get(&Stage::ImportVideo) {
            Some(StageOutput::ImportVideo(o)) => Ok(o),
            _ => Err(Self::missing(Stage::ImportVideo)),
        }
    }

    pub fn extract_audio(&self) -> StageResult<&ExtractAudioOutput> {
        match self.upstream.get(&Stage::ExtractAudio) {
            Some(StageOutput::ExtractAudio(o)) => Ok(o),
            _ => Err(Self::missing(Stage::ExtractAudio)),
        }
    }

    pub fn speech_to_text(&self) -> StageResult<&SpeechToTextOutput> {
        match self.upstream.get(&Stage::SpeechToText) {
            Some(StageOutput::SpeechToText(o)) => Ok(o),
            _ => Err(Self::missing(Stage::SpeechToText)),
        }
    }

    pub fn frame_extraction(&self) -> StageResult<&FrameExtractionOutput> {
        match self.upstream.get(&Stage::FrameExtraction) {
            Some(StageOutput::FrameExtraction(o)) => Ok(o),
            _ => Err(Self::missing(Stage::FrameExtraction)),
        }
    }

    pub fn ocr_extraction(&self) -> StageResult<&OcrExtractionOutput> {
        match self.upstream.get(&Stage::OcrExtraction) {
            Some(StageOutput::OcrExtraction(o)) => Ok(o),
            _ => Err(Self::missing(Stage::OcrExtraction)),
        }
    }

    pub fn object_detection(&self) -> StageResult<&ObjectDetectionOutput> {
        match self.upstream.get(&Stage::ObjectDetection) {
            Some(StageOutput::ObjectDetection(o)) => Ok(o),
            _ => Err(Self::missing(Stage::ObjectDetection)),
        }
    }

    pub fn keyframe_selection(&self) -> StageResult<&KeyframeSelectionOutput> {
        match self.upstream.get(&Stage::KeyframeSelection) {
            Some(StageOutput::KeyframeSelection(o)) => Ok(o),
            _ => Err(Self::missing(Stage::KeyframeSelection)),
        }
    }

    pub fn image_captioning(&self) -> StageResult<&ImageCaptioningOutput> {
        match self.upstream.get(&Stage::ImageCaptioning) {
            Some(StageOutput::ImageCaptioning(o)) => Ok(o),
            _ => Err(Self::missing(Stage::ImageCaptioning)),
        }
    }

    pub fn caption_rating(&self) -> StageResult<&CaptionRatingOutput> {
        match self.upstream.get(&Stage::CaptionRating) {
            Some(StageOutput::CaptionRating(o)) => Ok(o),
            _ => Err(Self::missing(Stage::CaptionRating)),
        }
    }

    pub fn scene_segmentation(&self) -> StageResult<&SceneSegmentationOutput> {
        match self.upstream.get(&Stage::SceneSegmentation) {
            Some(StageOutput::SceneSegmentation(o)) => Ok(o),
            _ => Err(Self::missing(Stage::SceneSegmentation)),
        }
    }

    pub fn text_summarization(&self) -> StageResult<&TextSummarizationOutput> {
        match self.upstream.get(&Stage::TextSummarization) {
            Some(StageOutput::TextSummarization(o)) => Ok(o),
            _ => Err(Self::missing(Stage::TextSummarization)),
        }
    }

    /// Directory sampled frames live in.
    pub fn frames_dir(&self) -> PathBuf {
        self.artifacts_dir.join(vdesc_models::FRAMES_DIR_NAME)
    }
}
