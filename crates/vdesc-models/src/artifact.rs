//! The final YDX artifact schema and egress request bodies.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Fixed pre-roll applied to every non-dialogue clip before upload.
pub const AUDIO_CLIP_PREROLL_SECS: f64 = 1.0;

/// The two kinds of visually-derived audio clips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ClipKind {
    #[serde(rename = "Visual")]
    Visual,
    #[serde(rename = "Text on Screen")]
    TextOnScreen,
}

/// One audio-description clip in the final artifact.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AudioClip {
    pub start_time: f64,
    pub text: String,
    #[serde(rename = "type")]
    pub kind: ClipKind,
}

/// Wire shape of a dialogue timestamp in the artifact.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactDialogue {
    pub sequence_num: u32,
    pub start_time: f64,
    pub end_time: f64,
    pub duration: f64,
}

/// Body of `POST {ydx_server}/api/audio-descriptions/newaidescription/`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FinalDescription {
    pub youtube_id: String,
    pub audio_clips: Vec<AudioClip>,
    pub video_length: f64,
    pub video_name: String,
    pub dialogue_timestamps: Vec<ArtifactDialogue>,
    #[serde(rename = "aiUserId")]
    pub ai_user_id: String,
}

/// Body of `POST {ydx_server}/api/create-user-links/generate-audio-desc-gpu`,
/// sent once per subscriber after the artifact lands.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CreateUserLinksRequest {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "youtubeVideoId")]
    pub youtube_video_id: String,
    pub ydx_app_host: String,
    #[serde(rename = "aiUserId")]
    pub ai_user_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_kind_serializes_to_downstream_labels() {
        assert_eq!(
            serde_json::to_string(&ClipKind::Visual).unwrap(),
            "\"Visual\""
        );
        assert_eq!(
            serde_json::to_string(&ClipKind::TextOnScreen).unwrap(),
            "\"Text on Screen\""
        );
    }

    #[test]
    fn create_user_links_uses_camel_case_keys() {
        let req = CreateUserLinksRequest {
            user_id: "alice".into(),
            youtube_video_id: "abc".into(),
            ydx_app_host: "https://app".into(),
            ai_user_id: "u1".into(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("userId").is_some());
        assert!(json.get("youtubeVideoId").is_some());
        assert!(json.get("aiUserId").is_some());
    }
}
