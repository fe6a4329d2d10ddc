//! import_video: fetch the source MP4, apply the optional trim window,
//! and emit normalized metadata.

use tracing::info;

use vdesc_media::{download_video, is_permanent_download_failure, probe_video, trim_video, MediaError};
use vdesc_models::{ImportVideoOutput, StageOutput, VIDEO_FILE_NAME};

use crate::context::{PipelineServices, StageInput};
use crate::error::{StageError, StageResult};

pub async fn run(_ctx: &PipelineServices, input: &StageInput) -> StageResult<StageOutput> {
    tokio::fs::create_dir_all(&input.artifacts_dir).await?;

    let video_path = input.artifacts_dir.join(VIDEO_FILE_NAME);
    let video_id = input.job.key.video_id.as_str();

    let downloaded = if let Some(trim) = input.job.trim {
        // Download to a raw file first, then cut the requested window.
        let raw_path = input.artifacts_dir.join("raw.mp4");
        let downloaded = download_video(video_id, &raw_path)
            .await
            .map_err(classify_download)?;
        trim_video(&raw_path, &video_path, trim.start_secs, trim.end_secs).await?;
        tokio::fs::remove_file(&raw_path).await.ok();
        downloaded
    } else {
        download_video(video_id, &video_path)
            .await
            .map_err(classify_download)?
    };

    // Duration comes from the file we will actually process, so a trim
    // window is reflected; title comes from the extractor.
    let probe = probe_video(&video_path).await?;

    info!(
        video_id,
        title = %downloaded.title,
        duration = probe.duration,
        "Video imported"
    );

    Ok(StageOutput::ImportVideo(ImportVideoOutput {
        duration: probe.duration,
        title: downloaded.title,
        file_path: video_path.to_string_lossy().into_owned(),
    }))
}

fn classify_download(e: MediaError) -> StageError {
    match &e {
        MediaError::DownloadFailed(msg) if is_permanent_download_failure(msg) => {
            StageError::fatal(e.to_string())
        }
        _ => e.into(),
    }
}
