//! text_summarization: within each scene, group near-duplicate captions
//! by BLEU similarity and keep one representative per group.

use tracing::info;

use vdesc_models::{RatedCaption, StageOutput, SummarizedScene, TextSummarizationOutput};

use crate::context::{PipelineServices, StageInput};
use crate::error::StageResult;
use crate::stages::similarity::caption_similarity;

/// Captions at least this similar merge into one group.
const GROUP_THRESHOLD: f64 = 0.4;

/// At most this many caption groups survive per scene.
const MAX_GROUPS_PER_SCENE: usize = 3;

pub async fn run(_ctx: &PipelineServices, input: &StageInput) -> StageResult<StageOutput> {
    let scenes = input.scene_segmentation()?;
    let rating = input.caption_rating()?;
    let import = input.import_video()?;

    let mut summarized = Vec::new();
    let mut scene_number = 1u32;

    for scene in &scenes.scenes {
        let captions: Vec<&RatedCaption> = rating
            .kept
            .iter()
            .filter(|c| c.ts_s >= scene.start_s && c.ts_s < scene.end_s)
            .collect();

        let Some(text) = summarize_scene(&captions) else {
            continue;
        };

        summarized.push(SummarizedScene {
            start_s: scene.start_s,
            end_s: scene.end_s,
            text,
            scene_number,
        });
        scene_number += 1;
    }

    if summarized.is_empty() {
        summarized = quartile_fallback(&rating.rated, import.duration);
    }

    info!(
        key = %input.job.key,
        scenes = scenes.scenes.len(),
        summarized = summarized.len(),
        "Text summarization complete"
    );

    Ok(StageOutput::TextSummarization(TextSummarizationOutput {
        summarized,
    }))
}

/// Pick the representative captions for one scene, or `None` when the
/// scene has no captions at all.
fn summarize_scene(captions: &[&RatedCaption]) -> Option<String> {
    if captions.is_empty() {
        return None;
    }

    // Few captions: keep them all.
    if captions.len() <= MAX_GROUPS_PER_SCENE {
        return Some(
            captions
                .iter()
                .map(|c| c.caption.as_str())
                .collect::<Vec<_>>()
                .join(" "),
        );
    }

    let texts: Vec<&str> = captions.iter().map(|c| c.caption.as_str()).collect();
    let scores = pairwise_scores(&texts);
    let groups = similarity_groups(&texts, &scores);

    let mut representatives = Vec::new();
    for group in groups.iter().take(MAX_GROUPS_PER_SCENE) {
        representatives.push(texts[best_in_group(group, &scores)]);
    }

    Some(representatives.join(" "))
}

fn pairwise_scores(texts: &[&str]) -> Vec<Vec<f64>> {
    let n = texts.len();
    let mut scores = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let score = caption_similarity(texts[i], texts[j]);
            scores[i][j] = score;
            scores[j][i] = score;
        }
    }
    scores
}

/// Group captions by transitive closure over the similarity threshold
/// (depth-first), then sort groups by size and intra-group score sum.
fn similarity_groups(texts: &[&str], scores: &[Vec<f64>]) -> Vec<Vec<usize>> {
    let n = texts.len();
    let mut visited = vec![false; n];
    let mut groups: Vec<Vec<usize>> = Vec::new();

    for start in 0..n {
        if visited[start] {
            continue;
        }
        let mut group = Vec::new();
        let mut stack = vec![start];
        while let Some(idx) = stack.pop() {
            if visited[idx] {
                continue;
            }
            visited[idx] = true;
            group.push(idx);
            for j in 0..n {
                if !visited[j] && scores[idx][j] >= GROUP_THRESHOLD {
                    stack.push(j);
                }
            }
        }
        groups.push(group);
    }

    groups.sort_by(|a, b| {
        b.len()
            .cmp(&a.len())
            .then_with(|| group_score(b, scores).total_cmp(&group_score(a, scores)))
    });
    groups
}

fn group_score(group: &[usize], scores: &[Vec<f64>]) -> f64 {
    let mut sum = 0.0;
    for (pos, &i) in group.iter().enumerate() {
        for &j in &group[pos + 1..] {
            sum += scores[i][j];
        }
    }
    sum
}

/// The member maximizing total similarity against the rest of its group.
fn best_in_group(group: &[usize], scores: &[Vec<f64>]) -> usize {
    *group
        .iter()
        .max_by(|&&a, &&b| {
            let score_a: f64 = group.iter().map(|&j| scores[a][j]).sum();
            let score_b: f64 = group.iter().map(|&j| scores[b][j]).sum();
            score_a.total_cmp(&score_b)
        })
        .unwrap_or(&group[0])
}

/// No valid scenes at all: synthesize one scene per duration quartile
/// from the highest-rated caption inside each.
fn quartile_fallback(rated: &[RatedCaption], duration: f64) -> Vec<SummarizedScene> {
    let quarter = duration / 4.0;
    let mut scenes = Vec::new();
    let mut scene_number = 1u32;

    for q in 0..4 {
        let start = quarter * q as f64;
        let end = if q == 3 { duration } else { quarter * (q + 1) as f64 };

        let best = rated
            .iter()
            .filter(|c| c.ts_s >= start && c.ts_s < end)
            .max_by(|a, b| a.rating.total_cmp(&b.rating));

        if let Some(caption) = best {
            scenes.push(SummarizedScene {
                start_s: start,
                end_s: end,
                text: caption.caption.clone(),
                scene_number,
            });
            scene_number += 1;
        }
    }

    scenes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rated(ts: f64, text: &str, rating: f64) -> RatedCaption {
        RatedCaption {
            frame_idx: (ts * 10.0) as u32,
            ts_s: ts,
            caption: text.to_string(),
            rating,
        }
    }

    #[test]
    fn few_captions_are_kept_verbatim() {
        let captions = vec![
            rated(1.0, "a dog runs", 0.8),
            rated(2.0, "a cat sits", 0.7),
        ];
        let refs: Vec<&RatedCaption> = captions.iter().collect();
        let text = summarize_scene(&refs).unwrap();
        assert!(text.contains("a dog runs"));
        assert!(text.contains("a cat sits"));
    }

    #[test]
    fn near_duplicates_collapse_to_one_representative() {
        let captions = vec![
            rated(1.0, "a man rides a bicycle down the street", 0.9),
            rated(2.0, "a man rides a bike down the street", 0.9),
            rated(3.0, "a man rides a bicycle down a street", 0.9),
            rated(4.0, "a completely different orange sunset", 0.9),
        ];
        let refs: Vec<&RatedCaption> = captions.iter().collect();
        let text = summarize_scene(&refs).unwrap();

        // One representative of the bicycle group plus the sunset caption
        let bicycle_mentions = text.matches("rides").count();
        assert_eq!(bicycle_mentions, 1, "summary was {text:?}");
        assert!(text.contains("sunset"));
    }

    #[test]
    fn empty_scene_summarizes_to_none() {
        assert!(summarize_scene(&[]).is_none());
    }

    #[test]
    fn quartile_fallback_picks_highest_rated_per_window() {
        let rated_captions = vec![
            rated(5.0, "early low", 0.2),
            rated(8.0, "early high", 0.9),
            rated(35.0, "late", 0.5),
        ];
        let scenes = quartile_fallback(&rated_captions, 40.0);

        assert_eq!(scenes.len(), 2);
        assert_eq!(scenes[0].text, "early high");
        assert_eq!(scenes[1].text, "late");
        assert_eq!(scenes[0].scene_number, 1);
        assert_eq!(scenes[1].scene_number, 2);
    }
}
