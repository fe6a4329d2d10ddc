//! object_detection: batch sampled frames to the detect service and
//! collate a dense label/confidence table.

use std::collections::BTreeSet;

use tracing::info;

use vdesc_models::{
    frame_file_name, Detection, FrameDetections, ObjectDetectionOutput, StageOutput,
};
use vdesc_services::ServiceKind;

use crate::context::{PipelineServices, StageInput};
use crate::error::StageResult;

pub async fn run(ctx: &PipelineServices, input: &StageInput) -> StageResult<StageOutput> {
    let frames = input.frame_extraction()?;
    let frames_dir = std::path::PathBuf::from(&frames.frames_dir);

    let paths: Vec<String> = (0..frames.num_frames)
        .map(|idx| frames_dir.join(frame_file_name(idx)).to_string_lossy().into_owned())
        .collect();

    let mut per_frame: Vec<FrameDetections> = Vec::with_capacity(paths.len());
    let mut labels: BTreeSet<String> = BTreeSet::new();

    for (batch_index, batch) in paths.chunks(ctx.config.detect_batch_size.max(1)).enumerate() {
        let batch_start = (batch_index * ctx.config.detect_batch_size.max(1)) as u32;

        let handle = ctx
            .pool
            .acquire(ServiceKind::Detect, ctx.config.service_deadline)
            .await?;
        let results = ctx
            .inference
            .detect_files(&handle, batch.to_vec(), ctx.config.detect_confidence_threshold)
            .await?;
        drop(handle);

        for result in results {
            // frame_number is the index within the submitted batch
            let frame_idx = batch_start + result.frame_number;
            let detections: Vec<Detection> = result
                .confidences
                .into_iter()
                .map(|c| {
                    labels.insert(c.name.clone());
                    Detection {
                        label: c.name,
                        confidence: c.confidence,
                    }
                })
                .collect();
            per_frame.push(FrameDetections {
                frame_idx,
                detections,
            });
        }
    }

    per_frame.sort_by_key(|f| f.frame_idx);

    info!(
        key = %input.job.key,
        frames = per_frame.len(),
        labels = labels.len(),
        "Object detection complete"
    );

    Ok(StageOutput::ObjectDetection(ObjectDetectionOutput {
        per_frame,
        labels: labels.into_iter().collect(),
    }))
}
