//! Scratch artifact directory naming.
//!
//! Each job owns exactly one directory under the artifacts root; jobs never
//! touch each other's directories, so no locking is needed.

use std::path::{Path, PathBuf};

use crate::job::{JobKey, TrimWindow};

/// File name of the downloaded (and possibly trimmed) video.
pub const VIDEO_FILE_NAME: &str = "video.mp4";

/// File name of the extracted audio track.
pub const AUDIO_FILE_NAME: &str = "audio.flac";

/// Subdirectory holding sampled frames.
pub const FRAMES_DIR_NAME: &str = "frames";

/// Scratch directory for one job:
/// `<root>/<video_id>_files[_<start>_<end>]_<ai_user_id>/`.
pub fn artifact_dir(root: impl AsRef<Path>, key: &JobKey, trim: Option<TrimWindow>) -> PathBuf {
    let name = match trim {
        Some(window) => format!(
            "{}_files_{}_{}_{}",
            key.video_id, window.start_secs, window.end_secs, key.ai_user_id
        ),
        None => format!("{}_files_{}", key.video_id, key.ai_user_id),
    };
    root.as_ref().join(name)
}

/// File name of sampled frame `idx` inside [`FRAMES_DIR_NAME`].
pub fn frame_file_name(idx: u32) -> String {
    format!("frame_{idx}.jpg")
}
