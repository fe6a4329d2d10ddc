//! Intake HTTP API.
//!
//! A single substantive endpoint, `POST /generate_ai_caption`, validates
//! the request, deduplicates against in-flight jobs for the same
//! (video_id, ai_user_id) by subscribing instead of re-enqueueing, and
//! pushes a job reference onto the queues. Sits behind a trusted proxy;
//! no auth here.

pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
