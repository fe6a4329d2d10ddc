//! Narrow REST clients for the Google Cloud collaborators: blob storage,
//! long-running Speech-to-Text, and Vision text detection.
//!
//! These are deliberately thin: upload, recognize, poll, annotate, delete.
//! Auth goes through `gcp_auth`, which picks up
//! `GOOGLE_APPLICATION_CREDENTIALS` on its own.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ServiceError, ServiceResult};
use crate::types::{OcrAnnotation, SpeechSegment, SpeechWord};

const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Google client configuration.
#[derive(Debug, Clone)]
pub struct GoogleConfig {
    /// Bucket FLAC files are staged in for recognition.
    pub bucket: String,
    pub storage_base: String,
    pub speech_base: String,
    pub vision_base: String,
    pub timeout: Duration,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            bucket: "vdesc-audio".to_string(),
            storage_base: "https://storage.googleapis.com".to_string(),
            speech_base: "https://speech.googleapis.com".to_string(),
            vision_base: "https://vision.googleapis.com".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

impl GoogleConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            bucket: std::env::var("GCS_BUCKET").unwrap_or_else(|_| "vdesc-audio".to_string()),
            ..Self::default()
        }
    }
}

enum TokenSource {
    Provider(Arc<dyn gcp_auth::TokenProvider>),
    /// Fixed token for tests against a mock server.
    Static(String),
}

/// Client for the Google Cloud endpoints.
pub struct GoogleClient {
    http: reqwest::Client,
    config: GoogleConfig,
    tokens: TokenSource,
}

impl GoogleClient {
    /// Build against real Google Cloud using application-default
    /// credentials.
    pub async fn from_env() -> ServiceResult<Self> {
        let provider = gcp_auth::provider()
            .await
            .map_err(|e| ServiceError::Auth(e.to_string()))?;
        Self::with_provider(GoogleConfig::from_env(), provider)
    }

    pub fn with_provider(
        config: GoogleConfig,
        provider: Arc<dyn gcp_auth::TokenProvider>,
    ) -> ServiceResult<Self> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            config,
            tokens: TokenSource::Provider(provider),
        })
    }

    /// Build with a fixed bearer token (tests against wiremock).
    pub fn with_static_token(config: GoogleConfig, token: impl Into<String>) -> ServiceResult<Self> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            config,
            tokens: TokenSource::Static(token.into()),
        })
    }

    async fn bearer(&self) -> ServiceResult<String> {
        match &self.tokens {
            TokenSource::Provider(provider) => {
                let token = provider
                    .token(&[CLOUD_PLATFORM_SCOPE])
                    .await
                    .map_err(|e| ServiceError::Auth(e.to_string()))?;
                Ok(token.as_str().to_string())
            }
            TokenSource::Static(token) => Ok(token.clone()),
        }
    }

    async fn check(response: reqwest::Response) -> ServiceResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ServiceError::Google {
                status: status.as_u16(),
                body,
            })
        }
    }

    // ========================================================================
    // Cloud Storage
    // ========================================================================

    /// Upload a blob; returns its `gs://` URI.
    pub async fn upload_blob(&self, name: &str, bytes: Vec<u8>) -> ServiceResult<String> {
        let token = self.bearer().await?;
        let url = format!(
            "{}/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            self.config.storage_base,
            self.config.bucket,
            encode_component(name),
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .header("Content-Type", "application/octet-stream")
            .body(bytes)
            .send()
            .await?;
        Self::check(response).await?;

        let uri = format!("gs://{}/{}", self.config.bucket, name);
        debug!(uri = %uri, "Uploaded blob");
        Ok(uri)
    }

    /// Delete a staged blob. Missing blobs are not an error.
    pub async fn delete_blob(&self, name: &str) -> ServiceResult<()> {
        let token = self.bearer().await?;
        let url = format!(
            "{}/storage/v1/b/{}/o/{}",
            self.config.storage_base,
            self.config.bucket,
            encode_component(name),
        );

        let response = self.http.delete(&url).bearer_auth(&token).send().await?;
        if response.status().as_u16() == 404 {
            return Ok(());
        }
        Self::check(response).await?;
        Ok(())
    }

    // ========================================================================
    // Speech-to-Text
    // ========================================================================

    /// Submit a long-running recognition for a staged FLAC blob; returns
    /// the operation name to poll.
    pub async fn start_recognition(
        &self,
        gcs_uri: &str,
        sample_rate: u32,
        channels: u8,
    ) -> ServiceResult<String> {
        let token = self.bearer().await?;
        let url = format!("{}/v1/speech:longrunningrecognize", self.config.speech_base);

        let body = RecognizeRequest {
            config: RecognitionConfig {
                encoding: "FLAC".to_string(),
                sample_rate_hertz: sample_rate,
                audio_channel_count: channels,
                language_code: "en-US".to_string(),
                enable_word_time_offsets: true,
            },
            audio: RecognitionAudio {
                uri: gcs_uri.to_string(),
            },
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?;
        let response = Self::check(response).await?;
        let operation: OperationRef = response
            .json()
            .await
            .map_err(|e| ServiceError::Auth(format!("bad operation response: {e}")))?;

        info!(operation = %operation.name, "Recognition started");
        Ok(operation.name)
    }

    /// Poll a recognition operation until it completes or `max_wait`
    /// elapses. Long operations (minutes) are expected.
    pub async fn poll_recognition(
        &self,
        operation_name: &str,
        poll_interval: Duration,
        max_wait: Duration,
    ) -> ServiceResult<Vec<SpeechSegment>> {
        let deadline = tokio::time::Instant::now() + max_wait;

        loop {
            let token = self.bearer().await?;
            let url = format!("{}/v1/operations/{}", self.config.speech_base, operation_name);

            let response = self.http.get(&url).bearer_auth(&token).send().await?;
            let response = Self::check(response).await?;
            let operation: OperationStatus = response
                .json()
                .await
                .map_err(|e| ServiceError::Auth(format!("bad operation status: {e}")))?;

            if operation.done {
                let results = operation
                    .response
                    .map(|r| r.results)
                    .unwrap_or_default();
                return Ok(results
                    .into_iter()
                    .filter_map(segment_from_result)
                    .collect());
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(ServiceError::Google {
                    status: 504,
                    body: format!("recognition {operation_name} still running after {max_wait:?}"),
                });
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    // ========================================================================
    // Vision
    // ========================================================================

    /// Run text detection on one image; annotations come back with the
    /// full text block first.
    pub async fn detect_text(&self, image_bytes: &[u8]) -> ServiceResult<Vec<OcrAnnotation>> {
        let token = self.bearer().await?;
        let url = format!("{}/v1/images:annotate", self.config.vision_base);

        let body = AnnotateRequest {
            requests: vec![AnnotateImageRequest {
                image: AnnotateImage {
                    content: base64::engine::general_purpose::STANDARD.encode(image_bytes),
                },
                features: vec![AnnotateFeature {
                    feature_type: "TEXT_DETECTION".to_string(),
                }],
            }],
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?;
        let response = Self::check(response).await?;
        let parsed: AnnotateResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Auth(format!("bad annotate response: {e}")))?;

        Ok(parsed
            .responses
            .into_iter()
            .next()
            .map(|r| {
                r.text_annotations
                    .into_iter()
                    .map(|a| OcrAnnotation {
                        text: a.description,
                        locale: a.locale.unwrap_or_default(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

fn segment_from_result(result: SpeechResult) -> Option<SpeechSegment> {
    let alternative = result.alternatives.into_iter().next()?;
    let words = alternative
        .words
        .into_iter()
        .filter_map(|w| {
            Some(SpeechWord {
                start_s: parse_duration_secs(&w.start_time)?,
                end_s: parse_duration_secs(&w.end_time)?,
                word: w.word,
            })
        })
        .collect::<Vec<_>>();

    let result_end_s = result
        .result_end_time
        .as_deref()
        .and_then(parse_duration_secs)
        .or_else(|| words.last().map(|w| w.end_s))?;

    Some(SpeechSegment {
        transcript: alternative.transcript,
        words,
        result_end_s,
    })
}

/// Parse a protobuf-JSON duration. The API emits `"3.500s"`; older
/// payloads occasionally arrive as a bare float. Either way the result is
/// numeric seconds.
fn parse_duration_secs(raw: &str) -> Option<f64> {
    raw.trim().trim_end_matches('s').parse().ok()
}

fn encode_component(name: &str) -> String {
    url::form_urlencoded::byte_serialize(name.as_bytes()).collect()
}

// Wire shapes (protobuf-JSON camelCase).

#[derive(Serialize)]
struct RecognizeRequest {
    config: RecognitionConfig,
    audio: RecognitionAudio,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecognitionConfig {
    encoding: String,
    sample_rate_hertz: u32,
    audio_channel_count: u8,
    language_code: String,
    enable_word_time_offsets: bool,
}

#[derive(Serialize)]
struct RecognitionAudio {
    uri: String,
}

#[derive(Deserialize)]
struct OperationRef {
    name: String,
}

#[derive(Deserialize)]
struct OperationStatus {
    #[serde(default)]
    done: bool,
    response: Option<RecognizeResponse>,
}

#[derive(Deserialize)]
struct RecognizeResponse {
    #[serde(default)]
    results: Vec<SpeechResult>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpeechResult {
    #[serde(default)]
    alternatives: Vec<SpeechAlternative>,
    result_end_time: Option<String>,
}

#[derive(Deserialize)]
struct SpeechAlternative {
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    words: Vec<SpeechWordWire>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpeechWordWire {
    start_time: String,
    end_time: String,
    word: String,
}

#[derive(Serialize)]
struct AnnotateRequest {
    requests: Vec<AnnotateImageRequest>,
}

#[derive(Serialize)]
struct AnnotateImageRequest {
    image: AnnotateImage,
    features: Vec<AnnotateFeature>,
}

#[derive(Serialize)]
struct AnnotateImage {
    content: String,
}

#[derive(Serialize)]
struct AnnotateFeature {
    #[serde(rename = "type")]
    feature_type: String,
}

#[derive(Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<AnnotateImageResponse>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateImageResponse {
    #[serde(default)]
    text_annotations: Vec<TextAnnotation>,
}

#[derive(Deserialize)]
struct TextAnnotation {
    description: String,
    locale: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_parse_handles_suffix_and_bare_float() {
        assert_eq!(parse_duration_secs("3.500s"), Some(3.5));
        assert_eq!(parse_duration_secs("0s"), Some(0.0));
        assert_eq!(parse_duration_secs("12.25"), Some(12.25));
        assert_eq!(parse_duration_secs("abc"), None);
    }

    #[test]
    fn segment_end_falls_back_to_last_word() {
        let result = SpeechResult {
            alternatives: vec![SpeechAlternative {
                transcript: "hi there".to_string(),
                words: vec![
                    SpeechWordWire {
                        start_time: "0s".to_string(),
                        end_time: "0.5s".to_string(),
                        word: "hi".to_string(),
                    },
                    SpeechWordWire {
                        start_time: "0.5s".to_string(),
                        end_time: "1.2s".to_string(),
                        word: "there".to_string(),
                    },
                ],
            }],
            result_end_time: None,
        };

        let segment = segment_from_result(result).expect("segment");
        assert!((segment.result_end_s - 1.2).abs() < f64::EPSILON);
        assert_eq!(segment.words.len(), 2);
    }
}
