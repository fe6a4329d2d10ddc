//! frame_extraction: sample frames at an adaptive rate and write them to
//! the job's frames directory.

use tracing::info;

use vdesc_media::{probe_video, sample_frames};
use vdesc_models::{FrameExtractionOutput, StageOutput};

use crate::context::{PipelineServices, StageInput};
use crate::error::{StageError, StageResult};

pub async fn run(ctx: &PipelineServices, input: &StageInput) -> StageResult<StageOutput> {
    let import = input.import_video()?;
    let frames_dir = input.frames_dir();

    let probe = probe_video(&import.file_path).await?;
    if probe.duration <= 0.0 {
        return Err(StageError::fatal(format!(
            "invalid video duration {}",
            probe.duration
        )));
    }

    let adaptive_fps = adaptive_rate(probe.duration, ctx.config.frame_extraction_rate);
    let num_frames = sample_frames(&import.file_path, &frames_dir, adaptive_fps).await?;
    if num_frames == 0 {
        return Err(StageError::fatal("no frames sampled"));
    }

    let step = probe.fps / adaptive_fps;

    info!(
        key = %input.job.key,
        adaptive_fps,
        num_frames,
        "Frames extracted"
    );

    Ok(StageOutput::FrameExtraction(FrameExtractionOutput {
        fps: probe.fps,
        adaptive_fps,
        step,
        num_frames,
        frames_dir: frames_dir.to_string_lossy().into_owned(),
    }))
}

/// Piecewise adaptive sampling rate. Short videos keep the default rate;
/// longer videos step down, and very long ones scale with duration so the
/// frame count stays bounded.
fn adaptive_rate(duration: f64, default_fps: u32) -> f64 {
    let default_fps = default_fps as f64;
    let rate = if duration <= 60.0 {
        default_fps
    } else if duration <= 300.0 {
        default_fps - 1.0
    } else if duration <= 900.0 {
        default_fps - 2.0
    } else {
        duration / 300.0
    };
    rate.max(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_video_keeps_default_rate() {
        assert_eq!(adaptive_rate(30.0, 3), 3.0);
        assert_eq!(adaptive_rate(60.0, 3), 3.0);
    }

    #[test]
    fn rate_steps_down_with_duration() {
        assert_eq!(adaptive_rate(120.0, 3), 2.0);
        assert_eq!(adaptive_rate(600.0, 3), 1.0);
    }

    #[test]
    fn long_video_scales_with_duration() {
        assert_eq!(adaptive_rate(1200.0, 3), 4.0);
        assert_eq!(adaptive_rate(3000.0, 3), 10.0);
    }

    #[test]
    fn rate_never_drops_below_one() {
        assert_eq!(adaptive_rate(120.0, 1), 1.0);
        assert!((adaptive_rate(901.0, 3) - 901.0 / 300.0).abs() < 1e-12);
    }
}
