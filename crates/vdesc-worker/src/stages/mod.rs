//! Stage adapters: one module per pipeline stage, each wrapping its
//! external collaborators behind `run(ctx, input) -> output`.

pub mod caption_rating;
pub mod extract_audio;
pub mod frame_extraction;
pub mod image_captioning;
pub mod import_video;
pub mod keyframe_selection;
pub mod object_detection;
pub mod ocr_extraction;
pub mod scene_segmentation;
pub mod similarity;
pub mod speech_to_text;
pub mod text_summarization;
pub mod upload_to_ydx;

use vdesc_models::{Stage, StageOutput};

use crate::context::{PipelineServices, StageInput};
use crate::error::StageResult;

/// Dispatch one stage invocation to its adapter.
pub async fn run_stage(
    stage: Stage,
    ctx: &PipelineServices,
    input: &StageInput,
) -> StageResult<StageOutput> {
    match stage {
        Stage::ImportVideo => import_video::run(ctx, input).await,
        Stage::ExtractAudio => extract_audio::run(ctx, input).await,
        Stage::SpeechToText => speech_to_text::run(ctx, input).await,
        Stage::FrameExtraction => frame_extraction::run(ctx, input).await,
        Stage::OcrExtraction => ocr_extraction::run(ctx, input).await,
        Stage::ObjectDetection => object_detection::run(ctx, input).await,
        Stage::KeyframeSelection => keyframe_selection::run(ctx, input).await,
        Stage::ImageCaptioning => image_captioning::run(ctx, input).await,
        Stage::CaptionRating => caption_rating::run(ctx, input).await,
        Stage::SceneSegmentation => scene_segmentation::run(ctx, input).await,
        Stage::TextSummarization => text_summarization::run(ctx, input).await,
        Stage::UploadToYdx => upload_to_ydx::run(ctx, input).await,
    }
}
