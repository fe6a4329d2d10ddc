//! upload_to_ydx: compose the final audio-description artifact and post
//! it to every subscriber's destination server.

use std::collections::HashSet;

use tracing::{info, warn};

use vdesc_models::{
    ArtifactDialogue, AudioClip, ClipKind, CreateUserLinksRequest, FinalDescription, StageOutput,
    Subscriber, UploadOutput, AUDIO_CLIP_PREROLL_SECS,
};

use crate::context::{PipelineServices, StageInput};
use crate::error::{StageError, StageResult};

/// Adjacent Text-on-Screen clips closer than this merge into one.
const TEXT_MERGE_WINDOW_SECS: f64 = 5.0;

pub async fn run(ctx: &PipelineServices, input: &StageInput) -> StageResult<StageOutput> {
    let summary = input.text_summarization()?;
    let speech = input.speech_to_text()?;
    let ocr = input.ocr_extraction()?;
    let import = input.import_video()?;
    let key = &input.job.key;

    let dialogue_timestamps: Vec<ArtifactDialogue> = speech
        .dialogue_timestamps
        .iter()
        .map(|d| ArtifactDialogue {
            sequence_num: d.sequence_num,
            start_time: d.start_s,
            end_time: d.end_s,
            duration: d.duration_s,
        })
        .collect();

    let audio_clips = compose_audio_clips(summary, ocr);

    let description = FinalDescription {
        youtube_id: key.video_id.to_string(),
        audio_clips,
        video_length: import.duration,
        video_name: import.title.clone(),
        dialogue_timestamps,
        ai_user_id: key.ai_user_id.to_string(),
    };

    let final_json = serde_json::to_value(&description)
        .map_err(|e| StageError::fatal(format!("serializing artifact: {e}")))?;

    // Retained on disk purely for human debugging.
    let debug_path = input.artifacts_dir.join("final_data.json");
    if let Err(e) = tokio::fs::write(&debug_path, serde_json::to_vec_pretty(&final_json)?).await {
        warn!(key = %key, "Could not write final_data.json: {e}");
    }

    // Subscribers are read at notification time: anyone attached while the
    // pipeline ran is included.
    let subscribers = ctx.store.list_subscribers(key).await?;
    let mut notified = 0u32;

    if ctx.config.upload_enabled {
        notified = notify_subscribers(ctx, key, &description, &subscribers).await?;
    } else {
        info!(key = %key, "Upload disabled, artifact composed but not posted");
    }

    info!(
        key = %key,
        clips = description.audio_clips.len(),
        subscribers = subscribers.len(),
        notified,
        "Upload stage complete"
    );

    Ok(StageOutput::UploadToYdx(UploadOutput {
        final_json,
        subscribers_notified: notified,
    }))
}

/// Merge summarized scenes ("Visual") with filtered OCR ("Text on
/// Screen"): shift every clip by the pre-roll, merge adjacent
/// Text-on-Screen clips, and order the result by start time.
fn compose_audio_clips(
    summary: &vdesc_models::TextSummarizationOutput,
    ocr: &vdesc_models::OcrExtractionOutput,
) -> Vec<AudioClip> {
    let mut visual: Vec<AudioClip> = summary
        .summarized
        .iter()
        .filter(|scene| !scene.text.trim().is_empty())
        .map(|scene| AudioClip {
            start_time: scene.start_s + AUDIO_CLIP_PREROLL_SECS,
            text: scene.text.replace('\n', ". "),
            kind: ClipKind::Visual,
        })
        .collect();

    let mut text_clips: Vec<AudioClip> = ocr
        .filtered_ocr
        .iter()
        .filter(|line| is_speakable(&line.text))
        .map(|line| AudioClip {
            start_time: line.ts_s + AUDIO_CLIP_PREROLL_SECS,
            text: line.text.clone(),
            kind: ClipKind::TextOnScreen,
        })
        .collect();

    text_clips.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
    let text_clips = merge_adjacent_text(text_clips);

    visual.extend(text_clips);
    visual.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
    visual
}

/// A line is worth speaking if more than one word survives punctuation
/// stripping.
fn is_speakable(text: &str) -> bool {
    let words = text
        .split_whitespace()
        .filter(|w| w.chars().any(|c| c.is_alphanumeric()))
        .count();
    words > 1
}

/// Concatenate Text-on-Screen clips whose starts are within the merge
/// window, so rapid-fire OCR lines read as one clip.
fn merge_adjacent_text(clips: Vec<AudioClip>) -> Vec<AudioClip> {
    let mut merged: Vec<AudioClip> = Vec::new();
    for clip in clips {
        match merged.last_mut() {
            Some(last) if (clip.start_time - last.start_time).abs() < TEXT_MERGE_WINDOW_SECS => {
                last.text.push_str(" \n ");
                last.text.push_str(&clip.text);
            }
            _ => merged.push(clip),
        }
    }
    merged
}

/// Post the artifact to each distinct destination server, then the
/// per-subscriber description-generation request.
async fn notify_subscribers(
    ctx: &PipelineServices,
    key: &vdesc_models::JobKey,
    description: &FinalDescription,
    subscribers: &[Subscriber],
) -> StageResult<u32> {
    let mut posted_servers: HashSet<&str> = HashSet::new();
    let mut notified = 0u32;

    for subscriber in subscribers {
        if posted_servers.insert(subscriber.ydx_server.as_str()) {
            let url = format!(
                "{}/api/audio-descriptions/newaidescription/",
                subscriber.ydx_server
            );
            post_json(ctx, &url, description).await?;
            info!(key = %key, server = %subscriber.ydx_server, "Artifact posted");
        }

        let url = format!(
            "{}/api/create-user-links/generate-audio-desc-gpu",
            subscriber.ydx_server
        );
        let request = CreateUserLinksRequest {
            user_id: subscriber.user_id.clone(),
            youtube_video_id: key.video_id.to_string(),
            ydx_app_host: subscriber.ydx_app_host.clone(),
            ai_user_id: key.ai_user_id.to_string(),
        };
        post_json(ctx, &url, &request).await?;
        notified += 1;
    }

    Ok(notified)
}

async fn post_json<T: serde::Serialize>(
    ctx: &PipelineServices,
    url: &str,
    body: &T,
) -> StageResult<()> {
    let response = ctx
        .http
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| StageError::transient(format!("POST {url}: {e}")))?;

    let status = response.status();
    if status.is_success() {
        Ok(())
    } else if status.is_server_error() {
        Err(StageError::transient(format!("POST {url} returned {status}")))
    } else {
        Err(StageError::fatal(format!("POST {url} returned {status}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdesc_models::{OcrExtractionOutput, OcrLine, SummarizedScene, TextSummarizationOutput};

    fn summary(scenes: Vec<(f64, f64, &str)>) -> TextSummarizationOutput {
        TextSummarizationOutput {
            summarized: scenes
                .into_iter()
                .enumerate()
                .map(|(i, (start_s, end_s, text))| SummarizedScene {
                    start_s,
                    end_s,
                    text: text.to_string(),
                    scene_number: i as u32 + 1,
                })
                .collect(),
        }
    }

    fn ocr(lines: Vec<(f64, &str)>) -> OcrExtractionOutput {
        OcrExtractionOutput {
            filtered_ocr: lines
                .into_iter()
                .enumerate()
                .map(|(i, (ts_s, text))| OcrLine {
                    frame_idx: i as u32,
                    ts_s,
                    text: text.to_string(),
                })
                .collect(),
            watermarks: Vec::new(),
        }
    }

    #[test]
    fn clips_are_shifted_by_the_preroll_and_sorted() {
        let clips = compose_audio_clips(
            &summary(vec![(10.0, 20.0, "a visual scene"), (0.0, 10.0, "the opening")]),
            &ocr(vec![(5.0, "SALE ENDS FRIDAY")]),
        );

        assert_eq!(clips.len(), 3);
        assert!((clips[0].start_time - 1.0).abs() < 1e-9); // opening scene at 0 + 1
        assert!((clips[1].start_time - 6.0).abs() < 1e-9); // OCR at 5 + 1
        assert!((clips[2].start_time - 11.0).abs() < 1e-9);
        assert!(clips.windows(2).all(|w| w[0].start_time <= w[1].start_time));
    }

    #[test]
    fn nearby_text_clips_merge() {
        let clips = compose_audio_clips(
            &summary(vec![]),
            &ocr(vec![
                (5.0, "FIRST LINE HERE"),
                (7.0, "SECOND LINE HERE"),
                (20.0, "MUCH LATER TEXT"),
            ]),
        );

        assert_eq!(clips.len(), 2);
        assert!(clips[0].text.contains("FIRST LINE"));
        assert!(clips[0].text.contains("SECOND LINE"));
        assert_eq!(clips[1].text, "MUCH LATER TEXT");
    }

    #[test]
    fn single_word_ocr_lines_are_dropped() {
        let clips = compose_audio_clips(&summary(vec![]), &ocr(vec![(3.0, "OK"), (9.0, "TWO WORDS")]));
        assert_eq!(clips.len(), 1);
        assert_eq!(clips[0].text, "TWO WORDS");
    }

    #[test]
    fn empty_scenes_produce_no_visual_clips() {
        let clips = compose_audio_clips(&summary(vec![(0.0, 10.0, "  ")]), &ocr(vec![]));
        assert!(clips.is_empty());
    }
}
