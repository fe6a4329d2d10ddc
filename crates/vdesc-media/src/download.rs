//! YouTube download via yt-dlp.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{MediaError, MediaResult};

/// Preferred format: MP4 video + M4A audio, falling back to best MP4,
/// falling back to whatever is available.
const FORMAT_SELECTOR: &str = "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best";

/// Result of a completed download.
#[derive(Debug, Clone)]
pub struct DownloadedVideo {
    pub path: PathBuf,
    /// Duration in seconds as reported by the extractor.
    pub duration: f64,
    pub title: String,
}

/// Download a YouTube video by id to `output_path`.
///
/// Duration and title are printed by yt-dlp after the move so a partial
/// download never yields metadata. Permanent failures (unavailable,
/// private, age-restricted) are distinguished from transient network
/// errors by the stderr text.
pub async fn download_video(
    video_id: &str,
    output_path: impl AsRef<Path>,
) -> MediaResult<DownloadedVideo> {
    which::which("yt-dlp").map_err(|_| MediaError::YtDlpNotFound)?;

    let output_path = output_path.as_ref();
    if let Some(parent) = output_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let url = format!("https://www.youtube.com/watch?v={video_id}");
    debug!(url = %url, "Starting yt-dlp download");

    let output = Command::new("yt-dlp")
        .arg("--quiet")
        .arg("--no-simulate")
        .arg("--no-warnings")
        .arg("--no-progress")
        .arg("--print")
        .arg("after_move:%(duration)s\t%(title)s")
        .arg("--format")
        .arg(FORMAT_SELECTOR)
        .arg("--merge-output-format")
        .arg("mp4")
        .arg("--output")
        .arg(output_path)
        .arg(&url)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        return Err(MediaError::DownloadFailed(stderr));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let (duration, title) = parse_print_line(stdout.trim())
        .ok_or_else(|| MediaError::DownloadFailed(format!("unparsable yt-dlp output {stdout:?}")))?;

    if !output_path.exists() {
        return Err(MediaError::DownloadFailed(
            "yt-dlp reported success but the output file is missing".to_string(),
        ));
    }

    info!(video_id, title = %title, duration, "Download complete");
    Ok(DownloadedVideo {
        path: output_path.to_path_buf(),
        duration,
        title,
    })
}

fn parse_print_line(line: &str) -> Option<(f64, String)> {
    let (duration, title) = line.split_once('\t')?;
    Some((duration.trim().parse().ok()?, title.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn print_line_parses_duration_and_title() {
        let (duration, title) = parse_print_line("30\tA Short Video").unwrap();
        assert!((duration - 30.0).abs() < f64::EPSILON);
        assert_eq!(title, "A Short Video");

        // Titles may contain further whitespace
        let (_, title) = parse_print_line("12.5\tTabs in\ttitle").unwrap();
        assert_eq!(title, "Tabs in\ttitle");
    }

    #[test]
    fn garbage_output_is_rejected() {
        assert!(parse_print_line("no tab here").is_none());
        assert!(parse_print_line("NA\ttitle").is_none());
    }
}
