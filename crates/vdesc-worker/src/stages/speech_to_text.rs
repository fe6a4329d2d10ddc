//! speech_to_text: stage the FLAC in blob storage, run long-running
//! recognition, and emit word timings plus numbered dialogue intervals.

use tracing::{info, warn};

use vdesc_models::{DialogueTimestamp, SpeechToTextOutput, StageOutput, WordTiming};

use crate::context::{PipelineServices, StageInput};
use crate::error::StageResult;

pub async fn run(ctx: &PipelineServices, input: &StageInput) -> StageResult<StageOutput> {
    let audio = input.extract_audio()?;
    let key = &input.job.key;

    let bytes = tokio::fs::read(&audio.audio_path).await?;
    let blob_name = format!("{}_{}.flac", key.video_id, key.ai_user_id);

    let gcs_uri = ctx.google.upload_blob(&blob_name, bytes).await?;

    let recognition = async {
        let operation = ctx
            .google
            .start_recognition(&gcs_uri, audio.sample_rate, audio.channels)
            .await?;
        ctx.google
            .poll_recognition(&operation, ctx.config.stt_poll_interval, ctx.config.stt_max_wait)
            .await
    };
    let segments = recognition.await;

    // The staged blob is scratch either way.
    if let Err(e) = ctx.google.delete_blob(&blob_name).await {
        warn!(key = %key, "Could not delete staged audio blob: {e}");
    }
    let segments = segments?;

    let mut words = Vec::new();
    let mut dialogue_timestamps = Vec::new();

    for (seq, segment) in segments.iter().enumerate() {
        let Some(first_word) = segment.words.first() else {
            continue;
        };
        let start_s = round2(first_word.start_s);
        let end_s = round2(segment.result_end_s);

        dialogue_timestamps.push(DialogueTimestamp {
            sequence_num: seq as u32,
            start_s,
            end_s,
            duration_s: round2(end_s - start_s),
        });

        words.extend(segment.words.iter().map(|w| WordTiming {
            word: w.word.clone(),
            start_s: w.start_s,
            end_s: w.end_s,
        }));
    }

    info!(
        key = %key,
        segments = dialogue_timestamps.len(),
        words = words.len(),
        "Transcription complete"
    );

    Ok(StageOutput::SpeechToText(SpeechToTextOutput {
        words,
        dialogue_timestamps,
    }))
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding_is_centisecond() {
        assert_eq!(round2(1.23456), 1.23);
        assert_eq!(round2(0.999), 1.0);
    }
}
