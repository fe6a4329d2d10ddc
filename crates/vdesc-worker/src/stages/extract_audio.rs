//! extract_audio: transcode the imported video's audio track to the
//! 48 kHz stereo FLAC the recognition backend expects.

use tracing::info;

use vdesc_media::extract_audio_flac;
use vdesc_models::{ExtractAudioOutput, StageOutput, AUDIO_FILE_NAME};

use crate::context::{PipelineServices, StageInput};
use crate::error::StageResult;

const SAMPLE_RATE: u32 = 48_000;
const CHANNELS: u8 = 2;

pub async fn run(ctx: &PipelineServices, input: &StageInput) -> StageResult<StageOutput> {
    let import = input.import_video()?;
    let audio_path = input.artifacts_dir.join(AUDIO_FILE_NAME);

    extract_audio_flac(&import.file_path, &audio_path, ctx.config.audio_timeout_secs).await?;

    info!(key = %input.job.key, audio = %audio_path.display(), "Audio extracted");

    Ok(StageOutput::ExtractAudio(ExtractAudioOutput {
        audio_path: audio_path.to_string_lossy().into_owned(),
        sample_rate: SAMPLE_RATE,
        channels: CHANNELS,
    }))
}
