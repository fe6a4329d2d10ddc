//! keyframe_selection: flag visually distinct sampled frames by comparing
//! grayscale histogram features between neighbors.

use std::collections::HashSet;

use tracing::info;

use vdesc_models::{frame_file_name, Keyframe, KeyframeSelectionOutput, StageOutput};

use crate::context::{PipelineServices, StageInput};
use crate::error::{StageError, StageResult};

/// Base cosine-distance threshold for flagging a keyframe.
const BASE_THRESHOLD: f64 = 0.5;

/// Threshold scale inside the first/last 10% of the video, where intros
/// and outros change quickly.
const EDGE_SCALE: f64 = 0.9;

pub async fn run(_ctx: &PipelineServices, input: &StageInput) -> StageResult<StageOutput> {
    let frames = input.frame_extraction()?;
    let detection = input.object_detection()?;
    let frames_dir = std::path::PathBuf::from(&frames.frames_dir);

    // Frames where the detected object set turns over completely serve as
    // an external scene-change hint on top of the histogram signal.
    let scene_changes = scene_change_hints(detection);

    let num_frames = frames.num_frames;
    let mut keyframes = Vec::new();
    let mut previous: Option<Vec<f64>> = None;

    for idx in 0..num_frames {
        let path = frames_dir.join(frame_file_name(idx));
        let features = tokio::task::spawn_blocking(move || histogram_features(&path))
            .await
            .map_err(|e| StageError::fatal(format!("feature task panicked: {e}")))??;

        let is_keyframe = match &previous {
            None => idx == 0,
            Some(prev) => {
                let distance = cosine_distance(prev, &features);
                distance > threshold_at(idx, num_frames) || scene_changes.contains(&idx)
            }
        };

        if is_keyframe {
            keyframes.push(Keyframe {
                frame_idx: idx,
                ts_s: frames.timestamp_of(idx),
            });
        }

        previous = Some(features);
    }

    if keyframes.is_empty() {
        // Unreachable in practice (frame 0 is always selected) but keeps
        // the downstream promise of at least one keyframe.
        keyframes.push(Keyframe {
            frame_idx: 0,
            ts_s: 0.0,
        });
    }

    info!(
        key = %input.job.key,
        keyframes = keyframes.len(),
        sampled = num_frames,
        "Keyframes selected"
    );

    Ok(StageOutput::KeyframeSelection(KeyframeSelectionOutput {
        keyframes,
    }))
}

fn threshold_at(idx: u32, num_frames: u32) -> f64 {
    let position = idx as f64 / num_frames.max(1) as f64;
    if position < 0.1 || position > 0.9 {
        BASE_THRESHOLD * EDGE_SCALE
    } else {
        BASE_THRESHOLD
    }
}

/// Frames whose label set shares nothing with the previous frame's
/// (both non-empty) read as hard scene changes.
fn scene_change_hints(detection: &vdesc_models::ObjectDetectionOutput) -> HashSet<u32> {
    let mut hints = HashSet::new();
    for pair in detection.per_frame.windows(2) {
        let prev: HashSet<&str> = pair[0].detections.iter().map(|d| d.label.as_str()).collect();
        let next: HashSet<&str> = pair[1].detections.iter().map(|d| d.label.as_str()).collect();
        if !prev.is_empty() && !next.is_empty() && prev.is_disjoint(&next) {
            hints.insert(pair[1].frame_idx);
        }
    }
    hints
}

/// 256-bin L2-normalized grayscale histogram.
fn histogram_features(path: &std::path::Path) -> StageResult<Vec<f64>> {
    let img = image::open(path)
        .map_err(|e| StageError::fatal(format!("decoding {}: {e}", path.display())))?
        .to_luma8();

    let mut hist = vec![0.0f64; 256];
    for pixel in img.pixels() {
        hist[pixel.0[0] as usize] += 1.0;
    }

    let norm = hist.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 0.0 {
        for v in &mut hist {
            *v /= norm;
        }
    }
    Ok(hist)
}

/// Cosine distance (1 - cosine similarity) between feature vectors.
pub fn cosine_distance(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdesc_models::{Detection, FrameDetections, ObjectDetectionOutput};

    #[test]
    fn cosine_distance_of_identical_vectors_is_zero() {
        let v = vec![0.5, 0.5, 0.0];
        assert!(cosine_distance(&v, &v).abs() < 1e-12);
    }

    #[test]
    fn cosine_distance_of_orthogonal_vectors_is_one() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!((cosine_distance(&a, &b) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn threshold_tightens_near_edges() {
        assert_eq!(threshold_at(0, 100), BASE_THRESHOLD * EDGE_SCALE);
        assert_eq!(threshold_at(95, 100), BASE_THRESHOLD * EDGE_SCALE);
        assert_eq!(threshold_at(50, 100), BASE_THRESHOLD);
    }

    #[test]
    fn disjoint_label_turnover_is_a_scene_hint() {
        fn frame(idx: u32, labels: &[&str]) -> FrameDetections {
            FrameDetections {
                frame_idx: idx,
                detections: labels
                    .iter()
                    .map(|l| Detection {
                        label: l.to_string(),
                        confidence: 0.9,
                    })
                    .collect(),
            }
        }

        let output = ObjectDetectionOutput {
            per_frame: vec![
                frame(0, &["person"]),
                frame(1, &["person", "dog"]),
                frame(2, &["car"]),
                frame(3, &[]),
            ],
            labels: vec!["person".into(), "dog".into(), "car".into()],
        };

        let hints = scene_change_hints(&output);
        assert!(hints.contains(&2)); // person/dog -> car
        assert!(!hints.contains(&1)); // overlap
        assert!(!hints.contains(&3)); // empty set is not a turnover
    }
}
