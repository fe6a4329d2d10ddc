//! caption_rating: score every caption against the rating service, keep
//! the ones above threshold, and merge the detection features onto the
//! captioned frames for scene segmentation.

use tracing::info;

use vdesc_models::{
    frame_file_name, CaptionRatingOutput, FrameFeatures, RatedCaption, StageOutput,
};
use vdesc_services::ServiceKind;

use crate::context::{PipelineServices, StageInput};
use crate::error::{StageError, StageResult};

pub async fn run(ctx: &PipelineServices, input: &StageInput) -> StageResult<StageOutput> {
    let captioning = input.image_captioning()?;
    let detection = input.object_detection()?;
    let frames_dir = input.frames_dir();

    let mut rated = Vec::with_capacity(captioning.captions.len());

    for caption in &captioning.captions {
        if ctx.cancelled() {
            return Err(StageError::transient("cancelled"));
        }

        let handle = ctx
            .pool
            .acquire(ServiceKind::Rating, ctx.config.service_deadline)
            .await?;
        let img_url = frames_dir
            .join(frame_file_name(caption.frame_idx))
            .to_string_lossy()
            .into_owned();
        let rating = ctx
            .inference
            .rate_caption(&handle, &img_url, &caption.caption)
            .await?;
        drop(handle);

        rated.push(RatedCaption {
            frame_idx: caption.frame_idx,
            ts_s: caption.ts_s,
            caption: caption.caption.clone(),
            rating,
        });
    }

    let kept: Vec<RatedCaption> = rated
        .iter()
        .filter(|c| c.rating > ctx.config.caption_rating_threshold)
        .cloned()
        .collect();

    // The captions-and-objects merge: one dense feature row per captioned
    // frame, in the label order the detection stage fixed.
    let frame_features: Vec<FrameFeatures> = rated
        .iter()
        .map(|c| FrameFeatures {
            frame_idx: c.frame_idx,
            ts_s: c.ts_s,
            features: detection.feature_row(c.frame_idx),
        })
        .collect();

    info!(
        key = %input.job.key,
        rated = rated.len(),
        kept = kept.len(),
        threshold = ctx.config.caption_rating_threshold,
        "Caption rating complete"
    );

    Ok(StageOutput::CaptionRating(CaptionRatingOutput {
        rated,
        kept,
        frame_features,
    }))
}
