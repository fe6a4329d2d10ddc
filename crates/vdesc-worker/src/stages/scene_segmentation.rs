//! scene_segmentation: cut the video into scenes where the detection
//! feature stream turns over, and describe each scene with its captions.

use tracing::info;

use vdesc_models::{FrameFeatures, RatedCaption, Scene, SceneSegmentationOutput, StageOutput};

use crate::context::{PipelineServices, StageInput};
use crate::error::{StageError, StageResult};
use crate::stages::keyframe_selection::cosine_distance;

/// Similarity below this reads as a visual turnover.
const SIMILARITY_THRESHOLD: f64 = 0.75;

/// Minimum scene length; boundaries closer than this are suppressed.
const MIN_SCENE_SECS: f64 = 10.0;

pub async fn run(_ctx: &PipelineServices, input: &StageInput) -> StageResult<StageOutput> {
    let rating = input.caption_rating()?;
    let import = input.import_video()?;

    if import.duration <= 0.0 {
        return Err(StageError::fatal(format!(
            "invalid video duration {}",
            import.duration
        )));
    }

    let scenes = segment(&rating.frame_features, &rating.kept, import.duration);

    info!(
        key = %input.job.key,
        scenes = scenes.len(),
        duration = import.duration,
        "Scene segmentation complete"
    );

    Ok(StageOutput::SceneSegmentation(SceneSegmentationOutput {
        scenes,
    }))
}

fn is_zero(v: &[f64]) -> bool {
    v.iter().all(|x| *x == 0.0)
}

/// Similarity between two sampled rows, `None` when either carries no
/// detections (a SKIP sample).
fn row_similarity(rows: &[FrameFeatures], a: usize, b: usize) -> Option<f64> {
    let a = rows.get(a)?;
    let b = rows.get(b)?;
    if is_zero(&a.features) || is_zero(&b.features) {
        return None;
    }
    Some(1.0 - cosine_distance(&a.features, &b.features))
}

/// Cut scenes at low-similarity points.
///
/// A boundary between rows `i` and `i+1` needs the neighbor similarity
/// AND both lag-2 similarities spanning the cut below threshold (a
/// single glitched frame keeps its spanning similarity high and is not a
/// boundary), and at least [`MIN_SCENE_SECS`] since the previous cut. A
/// SKIP run of at least [`MIN_SCENE_SECS`] forces a boundary when
/// samples resume.
fn segment(rows: &[FrameFeatures], kept: &[RatedCaption], duration: f64) -> Vec<Scene> {
    let mut boundaries: Vec<f64> = Vec::new();
    let mut last_boundary = 0.0f64;
    let mut skip_started: Option<f64> = None;

    let below = |sim: Option<f64>| sim.map(|s| s < SIMILARITY_THRESHOLD).unwrap_or(true);

    for i in 0..rows.len().saturating_sub(1) {
        let ts = rows[i + 1].ts_s;

        match row_similarity(rows, i, i + 1) {
            None => {
                if skip_started.is_none() {
                    skip_started = Some(rows[i].ts_s);
                }
            }
            Some(sim) => {
                if let Some(skip_ts) = skip_started.take() {
                    if ts - skip_ts >= MIN_SCENE_SECS && ts - last_boundary >= MIN_SCENE_SECS {
                        boundaries.push(ts);
                        last_boundary = ts;
                        continue;
                    }
                }

                // Lag-2 similarities spanning the candidate cut.
                let span_before = if i >= 1 {
                    row_similarity(rows, i - 1, i + 1)
                } else {
                    None
                };
                let span_after = row_similarity(rows, i, i + 2);

                if sim < SIMILARITY_THRESHOLD
                    && below(span_before)
                    && below(span_after)
                    && ts - last_boundary >= MIN_SCENE_SECS
                {
                    boundaries.push(ts);
                    last_boundary = ts;
                }
            }
        }
    }

    let mut scenes = Vec::new();
    let mut start = 0.0f64;
    for boundary in boundaries {
        scenes.push(make_scene(start, boundary, kept));
        start = boundary;
    }
    if start < duration {
        scenes.push(make_scene(start, duration, kept));
    }

    if scenes.is_empty() {
        // Degenerate input: one scene spanning the whole video.
        scenes.push(make_scene(0.0, duration, kept));
    }

    scenes
}

/// Scene description: the kept captions inside the interval, one per
/// line, in time order.
fn make_scene(start_s: f64, end_s: f64, kept: &[RatedCaption]) -> Scene {
    let description = kept
        .iter()
        .filter(|c| c.ts_s >= start_s && c.ts_s < end_s)
        .map(|c| c.caption.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    Scene {
        start_s,
        end_s,
        description,
    }
}
