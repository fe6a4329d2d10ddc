//! Media tooling contracts: FFmpeg transcoding, FFprobe probing, and
//! yt-dlp download. Everything shells out through `tokio::process` with
//! wall-clock bounds and cooperative cancellation.

mod command;
mod download;
mod error;
mod probe;

pub use command::{check_ffmpeg, check_ffprobe, check_ytdlp, FfmpegCommand, FfmpegRunner};
pub use download::{download_video, DownloadedVideo};
pub use error::{is_permanent_download_failure, MediaError, MediaResult};
pub use probe::{probe_video, VideoProbe};

use std::path::Path;

/// Extract the audio track as 48 kHz stereo FLAC, the format the
/// recognition backend expects. Wall-clock bounded so a wedged transcoder
/// cannot hang a stage forever.
pub async fn extract_audio_flac(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    timeout_secs: u64,
) -> MediaResult<()> {
    let cmd = FfmpegCommand::new(input, output)
        .audio_codec("flac")
        .output_args(["-ac", "2", "-ar", "48000", "-vn"]);

    FfmpegRunner::new().with_timeout(timeout_secs).run(&cmd).await
}

/// Trim a video to `[start_secs, end_secs]` with a stream copy.
pub async fn trim_video(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    start_secs: u32,
    end_secs: u32,
) -> MediaResult<()> {
    let duration = end_secs.saturating_sub(start_secs);
    let cmd = FfmpegCommand::new(input, output)
        .seek(start_secs as f64)
        .duration(duration as f64)
        .output_args(["-c", "copy"]);

    FfmpegRunner::new().run(&cmd).await
}

/// Sample frames evenly at `rate` frames per second of video time,
/// writing `frame_0.jpg`, `frame_1.jpg`, ... into `frames_dir`. Returns
/// the number of frames written.
pub async fn sample_frames(
    input: impl AsRef<Path>,
    frames_dir: impl AsRef<Path>,
    rate: f64,
) -> MediaResult<u32> {
    let frames_dir = frames_dir.as_ref();
    tokio::fs::create_dir_all(frames_dir).await?;

    let pattern = frames_dir.join("frame_%d.jpg");
    let cmd = FfmpegCommand::new(input, pattern)
        .video_filter(format!("fps={rate}"))
        .output_args(["-start_number", "0", "-qscale:v", "2"]);

    FfmpegRunner::new().run(&cmd).await?;

    let mut count = 0u32;
    let mut entries = tokio::fs::read_dir(frames_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("frame_") && name.ends_with(".jpg") {
            count += 1;
        }
    }
    Ok(count)
}
