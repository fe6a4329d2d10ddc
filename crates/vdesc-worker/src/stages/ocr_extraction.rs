//! ocr_extraction: detect on-screen text per sampled frame, strip
//! watermarks, and drop near-duplicate lines.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, info};

use vdesc_models::{frame_file_name, OcrExtractionOutput, OcrLine, StageOutput};

use crate::context::{PipelineServices, StageInput};
use crate::error::{StageError, StageResult};

/// Text present in more than this share of text-bearing frames is
/// background (a logo, a channel handle) and filtered out.
const WATERMARK_FRACTION: f64 = 0.6;

/// Lines at least this similar to the previously kept line are dropped.
const DUPLICATE_SIMILARITY: f64 = 0.8;

pub async fn run(ctx: &PipelineServices, input: &StageInput) -> StageResult<StageOutput> {
    let frames = input.frame_extraction()?;
    let frames_dir = std::path::PathBuf::from(&frames.frames_dir);

    // Fan out Vision requests with bounded parallelism; order is restored
    // by sorting on frame index afterwards.
    let google = Arc::clone(&ctx.google);
    let results: Vec<StageResult<Option<(u32, f64, String)>>> =
        stream::iter(0..frames.num_frames)
            .map(|idx| {
                let google = Arc::clone(&google);
                let path = frames_dir.join(frame_file_name(idx));
                let ts = frames.timestamp_of(idx);
                async move {
                    let bytes = tokio::fs::read(&path).await?;
                    let annotations = google.detect_text(&bytes).await?;
                    // The first annotation is the frame's full text block.
                    let Some(full) = annotations.first() else {
                        return Ok(None);
                    };
                    if !full.locale.is_empty() && full.locale != "en" {
                        return Ok(None);
                    }
                    let text = full.text.trim().to_string();
                    if text.is_empty() {
                        return Ok(None);
                    }
                    Ok(Some((idx, ts, text)))
                }
            })
            .buffer_unordered(ctx.config.ocr_parallelism.max(1))
            .collect()
            .await;

    let mut detections = Vec::new();
    for result in results {
        if let Some(hit) = result? {
            detections.push(hit);
        }
    }
    detections.sort_by_key(|(idx, _, _)| *idx);

    let watermarks = find_watermarks(&detections);
    debug!(key = %input.job.key, watermarks = watermarks.len(), "Watermarks detected");

    let filtered_ocr = filter_lines(&detections, &watermarks);

    info!(
        key = %input.job.key,
        frames_with_text = detections.len(),
        kept = filtered_ocr.len(),
        "OCR extraction complete"
    );

    Ok(StageOutput::OcrExtraction(OcrExtractionOutput {
        filtered_ocr,
        watermarks,
    }))
}

/// Normalize a line for watermark counting: case-folded, whitespace
/// collapsed.
fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Lines recurring in more than [`WATERMARK_FRACTION`] of text-bearing
/// frames are watermarks.
fn find_watermarks(detections: &[(u32, f64, String)]) -> Vec<String> {
    if detections.is_empty() {
        return Vec::new();
    }

    let mut counts: HashMap<String, (String, usize)> = HashMap::new();
    for (_, _, text) in detections {
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let entry = counts
                .entry(normalize(line))
                .or_insert_with(|| (line.to_string(), 0));
            entry.1 += 1;
        }
    }

    let threshold = detections.len() as f64 * WATERMARK_FRACTION;
    let mut watermarks: Vec<String> = counts
        .into_values()
        .filter(|(_, count)| *count as f64 > threshold)
        .map(|(original, _)| original)
        .collect();
    watermarks.sort();
    watermarks
}

/// Remove watermark lines, then drop lines nearly identical to the
/// previously kept one.
fn filter_lines(detections: &[(u32, f64, String)], watermarks: &[String]) -> Vec<OcrLine> {
    let watermark_set: Vec<String> = watermarks.iter().map(|w| normalize(w)).collect();

    let mut kept: Vec<OcrLine> = Vec::new();
    let mut last_kept: Option<String> = None;

    for (frame_idx, ts_s, text) in detections {
        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !watermark_set.contains(&normalize(line)))
            .collect();
        if lines.is_empty() {
            continue;
        }
        let joined = lines.join("\n");

        if let Some(prev) = &last_kept {
            if similarity(&normalize(prev), &normalize(&joined)) >= DUPLICATE_SIMILARITY {
                continue;
            }
        }

        last_kept = Some(joined.clone());
        kept.push(OcrLine {
            frame_idx: *frame_idx,
            ts_s: *ts_s,
            text: joined,
        });
    }

    kept
}

/// Edit-distance similarity in [0, 1].
fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let max_len = a.len().max(b.len());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / max_len as f64
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            current[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }

    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detections(texts: &[&str]) -> Vec<(u32, f64, String)> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| (i as u32, i as f64 * 0.5, t.to_string()))
            .collect()
    }

    #[test]
    fn logo_in_most_frames_is_a_watermark() {
        let det = detections(&[
            "ACME TV\nBreaking news",
            "ACME TV",
            "ACME TV\nWeather next",
            "ACME TV",
            "Something else",
        ]);
        let watermarks = find_watermarks(&det);
        assert_eq!(watermarks, vec!["ACME TV".to_string()]);
    }

    #[test]
    fn watermark_lines_are_stripped_from_output() {
        let det = detections(&[
            "ACME TV\nBreaking news",
            "ACME TV",
            "ACME TV\nWeather next",
            "ACME TV",
        ]);
        let watermarks = find_watermarks(&det);
        let kept = filter_lines(&det, &watermarks);

        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|line| !line.text.contains("ACME")));
    }

    #[test]
    fn near_duplicate_lines_are_dropped() {
        let det = detections(&["SALE ENDS FRIDAY", "SALE ENDS FRIDAY!", "totally new text"]);
        let kept = filter_lines(&det, &[]);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].text, "SALE ENDS FRIDAY");
        assert_eq!(kept[1].text, "totally new text");
    }

    #[test]
    fn similarity_bounds() {
        assert_eq!(similarity("abc", "abc"), 1.0);
        assert_eq!(similarity("", ""), 1.0);
        assert!(similarity("abc", "xyz") < 0.01);
    }
}
