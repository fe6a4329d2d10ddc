//! image_captioning: caption every keyframe through the single-flight
//! caption slot.
//!
//! This is the only stage contending on a single-permit resource. Each
//! request's life is `waiting -> acquired -> posting -> received ->
//! released`; the handle's RAII permit guarantees release on every path,
//! errors included.

use tracing::{debug, info};

use vdesc_models::{frame_file_name, FrameCaption, ImageCaptioningOutput, StageOutput};
use vdesc_services::ServiceKind;

use crate::context::{PipelineServices, StageInput};
use crate::error::{StageError, StageResult};

/// Marker the caption model emits for frames it cannot describe.
const UNKNOWN_TOKEN: &str = "<unk>";

pub async fn run(ctx: &PipelineServices, input: &StageInput) -> StageResult<StageOutput> {
    let keyframes = input.keyframe_selection()?;
    let frames_dir = input.frames_dir();

    let mut captions = Vec::new();

    for keyframe in &keyframes.keyframes {
        if ctx.cancelled() {
            return Err(StageError::transient("cancelled"));
        }

        let handle = ctx
            .pool
            .acquire(ServiceKind::Caption, ctx.config.service_deadline)
            .await?;

        let path = frames_dir.join(frame_file_name(keyframe.frame_idx));
        let caption = ctx.inference.caption_image(&handle, &path).await?;
        drop(handle);

        if caption.contains(UNKNOWN_TOKEN) {
            debug!(frame = keyframe.frame_idx, "Skipping <unk> caption");
            continue;
        }

        captions.push(FrameCaption {
            frame_idx: keyframe.frame_idx,
            ts_s: keyframe.ts_s,
            caption,
        });
    }

    info!(
        key = %input.job.key,
        keyframes = keyframes.keyframes.len(),
        captions = captions.len(),
        "Captioning complete"
    );

    Ok(StageOutput::ImageCaptioning(ImageCaptioningOutput {
        captions,
    }))
}
