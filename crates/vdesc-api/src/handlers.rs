//! Request handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use vdesc_models::{JobKey, JobRecord, JobStatus, Subscriber, TrimWindow};
use vdesc_queue::{PipelineTask, QueueTask, UploadOnlyTask};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Body of `POST /generate_ai_caption`. Field casing follows the
/// established ingress contract.
#[derive(Debug, Deserialize)]
pub struct GenerateCaptionRequest {
    pub youtube_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(rename = "AI_USER_ID")]
    pub ai_user_id: String,
    #[serde(default)]
    pub ydx_server: String,
    #[serde(default)]
    pub ydx_app_host: String,
    #[serde(default)]
    pub video_start_time: Option<String>,
    #[serde(default)]
    pub video_end_time: Option<String>,
}

/// Submit a job, or attach to the one already running for the same key.
pub async fn generate_ai_caption(
    State(state): State<AppState>,
    Json(request): Json<GenerateCaptionRequest>,
) -> ApiResult<(StatusCode, String)> {
    if request.youtube_id.trim().is_empty() {
        return Err(ApiError::bad_request("youtube_id must not be empty"));
    }
    if request.ai_user_id.trim().is_empty() {
        return Err(ApiError::bad_request("AI_USER_ID must not be empty"));
    }

    let trim = parse_trim(&request)?;

    // Backpressure: shed load before touching the store.
    let depth = state.queues.general.len().await?;
    if depth > state.config.queue_high_water {
        warn!(depth, "Rejecting submission, queue over high-water mark");
        return Err(ApiError::overloaded("queue is full, retry later"));
    }

    let key = JobKey::new(request.youtube_id.clone(), request.ai_user_id.clone());
    let subscriber = Subscriber {
        user_id: request.user_id.clone(),
        ydx_server: request.ydx_server.clone(),
        ydx_app_host: request.ydx_app_host.clone(),
    };

    let existing = state.store.get_job(&key).await?;
    metrics::counter!("intake_submissions").increment(1);

    match existing.map(|job| job.status) {
        // Active job: attach as a subscriber, no new queue entry.
        Some(JobStatus::Pending) | Some(JobStatus::InProgress) => {
            state.store.add_subscriber(&key, &subscriber).await?;
            info!(key = %key, user = %subscriber.user_id, "Subscribed to active job");
            Ok((StatusCode::OK, "queued-subscribed".to_string()))
        }

        // Finished job: late subscriber gets the upload-only fast path
        // on the caption queue.
        Some(JobStatus::Done) => {
            state.store.add_subscriber(&key, &subscriber).await?;
            let task = QueueTask::UploadOnly(UploadOnlyTask::new(key.clone()));
            match state.queues.enqueue(task).await {
                Ok(_) => {}
                Err(e) if e.is_duplicate() => {}
                Err(e) => return Err(e.into()),
            }
            info!(key = %key, "Late subscriber, upload fast path enqueued");
            Ok((StatusCode::OK, "queued-upload".to_string()))
        }

        // Failed job: fresh pending restarts processing from scratch.
        Some(JobStatus::Failed) => {
            state.store.reset_job(&key, trim).await?;
            state.store.add_subscriber(&key, &subscriber).await?;
            enqueue_pipeline(&state, &key).await?;
            info!(key = %key, "Failed job resubmitted");
            Ok((StatusCode::OK, "queued".to_string()))
        }

        None => {
            let record = JobRecord::new(key.clone(), trim);
            state.store.upsert_job(&record).await?;
            state.store.add_subscriber(&key, &subscriber).await?;
            enqueue_pipeline(&state, &key).await?;
            info!(key = %key, "Job queued");
            Ok((StatusCode::OK, "queued".to_string()))
        }
    }
}

async fn enqueue_pipeline(state: &AppState, key: &JobKey) -> ApiResult<()> {
    let task = QueueTask::Pipeline(PipelineTask::new(key.clone()));
    match state.queues.enqueue(task).await {
        Ok(_) => Ok(()),
        // A concurrent submission won the race; the subscriber is recorded
        Err(e) if e.is_duplicate() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn parse_trim(request: &GenerateCaptionRequest) -> ApiResult<Option<TrimWindow>> {
    let parse = |value: &Option<String>, name: &str| -> ApiResult<Option<u32>> {
        match value {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .map(Some)
                .map_err(|_| ApiError::bad_request(format!("{name} must be whole seconds"))),
        }
    };

    match (
        parse(&request.video_start_time, "video_start_time")?,
        parse(&request.video_end_time, "video_end_time")?,
    ) {
        (Some(start), Some(end)) if end > start => Ok(Some(TrimWindow {
            start_secs: start,
            end_secs: end,
        })),
        (Some(_), Some(_)) => Err(ApiError::bad_request(
            "video_end_time must be after video_start_time",
        )),
        (None, None) => Ok(None),
        _ => Err(ApiError::bad_request(
            "video_start_time and video_end_time must be provided together",
        )),
    }
}

/// Health response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

/// Health check endpoint (liveness probe).
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Readiness response.
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub queue_depth: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Readiness check endpoint: verifies queue connectivity.
pub async fn ready(
    State(state): State<AppState>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    match state.queues.general.len().await {
        Ok(depth) => Ok(Json(ReadinessResponse {
            status: "ready".to_string(),
            queue_depth: Some(depth),
            error: None,
        })),
        Err(e) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                status: "degraded".to_string(),
                queue_depth: None,
                error: Some(e.to_string()),
            }),
        )),
    }
}
