//! The stage registry: declaration order and inter-stage dependencies.
//!
//! Registry order is the execution order; a stage becomes runnable once
//! every stage it consumes is done, which is what lets the audio track
//! (extract_audio, speech_to_text) proceed in parallel with the frame
//! track, and OCR in parallel with detection.

use vdesc_models::Stage;

/// One registry entry.
#[derive(Debug, Clone, Copy)]
pub struct StageSpec {
    pub stage: Stage,
    /// Stages whose module outputs this stage reads.
    pub consumes: &'static [Stage],
}

/// The twelve stages in registry order.
///
/// `scene_segmentation` and `text_summarization` additionally consume
/// `import_video`: their fallback paths cover the full video duration,
/// which only the import metadata carries.
pub const REGISTRY: [StageSpec; 12] = [
    StageSpec {
        stage: Stage::ImportVideo,
        consumes: &[],
    },
    StageSpec {
        stage: Stage::ExtractAudio,
        consumes: &[Stage::ImportVideo],
    },
    StageSpec {
        stage: Stage::SpeechToText,
        consumes: &[Stage::ExtractAudio],
    },
    StageSpec {
        stage: Stage::FrameExtraction,
        consumes: &[Stage::ImportVideo],
    },
    StageSpec {
        stage: Stage::OcrExtraction,
        consumes: &[Stage::FrameExtraction],
    },
    StageSpec {
        stage: Stage::ObjectDetection,
        consumes: &[Stage::FrameExtraction],
    },
    StageSpec {
        stage: Stage::KeyframeSelection,
        consumes: &[Stage::FrameExtraction, Stage::ObjectDetection],
    },
    StageSpec {
        stage: Stage::ImageCaptioning,
        consumes: &[Stage::KeyframeSelection],
    },
    StageSpec {
        stage: Stage::CaptionRating,
        consumes: &[Stage::ImageCaptioning, Stage::ObjectDetection],
    },
    StageSpec {
        stage: Stage::SceneSegmentation,
        consumes: &[Stage::CaptionRating, Stage::ImportVideo],
    },
    StageSpec {
        stage: Stage::TextSummarization,
        consumes: &[Stage::SceneSegmentation, Stage::CaptionRating, Stage::ImportVideo],
    },
    StageSpec {
        stage: Stage::UploadToYdx,
        consumes: &[
            Stage::TextSummarization,
            Stage::SpeechToText,
            Stage::OcrExtraction,
            Stage::ImportVideo,
        ],
    },
];

/// The registry entry for a stage.
pub fn spec_for(stage: Stage) -> &'static StageSpec {
    REGISTRY
        .iter()
        .find(|spec| spec.stage == stage)
        .expect("every stage has a registry entry")
}

/// The stages a stage consumes.
pub fn dependencies(stage: Stage) -> &'static [Stage] {
    spec_for(stage).consumes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_stage_is_registered_once_in_model_order() {
        assert_eq!(REGISTRY.len(), Stage::ALL.len());
        for (spec, stage) in REGISTRY.iter().zip(Stage::ALL) {
            assert_eq!(spec.stage, stage);
        }
    }

    #[test]
    fn dependencies_precede_their_dependents() {
        for (idx, spec) in REGISTRY.iter().enumerate() {
            for dep in spec.consumes {
                let dep_idx = REGISTRY
                    .iter()
                    .position(|s| s.stage == *dep)
                    .expect("dependency is registered");
                assert!(
                    dep_idx < idx,
                    "{} depends on {} which is declared later",
                    spec.stage,
                    dep
                );
            }
        }
    }

    #[test]
    fn upload_consumes_all_three_tracks() {
        let deps = dependencies(Stage::UploadToYdx);
        assert!(deps.contains(&Stage::TextSummarization));
        assert!(deps.contains(&Stage::SpeechToText));
        assert!(deps.contains(&Stage::OcrExtraction));
        assert!(deps.contains(&Stage::ImportVideo));
    }

    #[test]
    fn audio_and_frame_tracks_are_independent() {
        // Nothing on the audio track consumes the frame track or vice versa
        for stage in [Stage::ExtractAudio, Stage::SpeechToText] {
            assert!(!dependencies(stage).contains(&Stage::FrameExtraction));
        }
        assert!(!dependencies(Stage::FrameExtraction).contains(&Stage::ExtractAudio));
    }
}
