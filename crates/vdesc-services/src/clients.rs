//! HTTP clients for the three inference contracts.

use std::path::Path;
use std::time::Duration;

use reqwest::multipart;
use tracing::debug;

use crate::error::{ServiceError, ServiceResult};
use crate::pool::ServiceHandle;
use crate::types::{CaptionResponse, DetectFrameResult, DetectRequest, DetectResponse};

/// Client for the captioning, rating, and detection services. A call takes
/// the [`ServiceHandle`] holding the concurrency slot, so a request cannot
/// be made without one.
pub struct InferenceClient {
    http: reqwest::Client,
}

impl InferenceClient {
    pub fn new(timeout: Duration) -> ServiceResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    /// `POST /detect_multiple_files` with a batch of frame paths.
    pub async fn detect_files(
        &self,
        handle: &ServiceHandle,
        frame_paths: Vec<String>,
        threshold: f64,
    ) -> ServiceResult<Vec<DetectFrameResult>> {
        let request = DetectRequest {
            files_path: frame_paths,
            threshold,
        };

        debug!(url = %handle.url, batch = request.files_path.len(), "Detect request");

        let response = self.http.post(&handle.url).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::RequestFailed {
                kind: handle.kind,
                status: status.as_u16(),
                body,
            });
        }

        let parsed: DetectResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::bad_response(handle.kind, e.to_string()))?;
        Ok(parsed.results)
    }

    /// `POST /upload` multipart with `image` and `token`; returns the
    /// caption text.
    pub async fn caption_image(
        &self,
        handle: &ServiceHandle,
        image_path: &Path,
    ) -> ServiceResult<String> {
        let bytes = tokio::fs::read(image_path).await?;
        let file_name = image_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "frame.jpg".to_string());

        let form = multipart::Form::new()
            .part(
                "image",
                multipart::Part::bytes(bytes)
                    .file_name(file_name)
                    .mime_str("image/jpeg")
                    .map_err(|e| ServiceError::bad_response(handle.kind, e.to_string()))?,
            )
            .text("token", handle.token.clone());

        let response = self.http.post(&handle.url).multipart(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::RequestFailed {
                kind: handle.kind,
                status: status.as_u16(),
                body,
            });
        }

        let parsed: CaptionResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::bad_response(handle.kind, e.to_string()))?;
        Ok(parsed.caption)
    }

    /// `POST /api` form with `token`, `img_url`, `caption`; the score comes
    /// back as text, sometimes wrapped as `['0.7']`.
    pub async fn rate_caption(
        &self,
        handle: &ServiceHandle,
        img_url: &str,
        caption: &str,
    ) -> ServiceResult<f64> {
        let form = [
            ("token", handle.token.as_str()),
            ("img_url", img_url),
            ("caption", caption),
        ];

        let response = self.http.post(&handle.url).form(&form).send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ServiceError::RequestFailed {
                kind: handle.kind,
                status: status.as_u16(),
                body,
            });
        }

        parse_rating(&body)
            .ok_or_else(|| ServiceError::bad_response(handle.kind, format!("unparsable score {body:?}")))
    }
}

/// Strip the service's `['…']` wrapper and parse the score.
fn parse_rating(body: &str) -> Option<f64> {
    body.trim()
        .trim_start_matches("['")
        .trim_end_matches("']")
        .trim_matches('"')
        .parse()
        .ok()
}
