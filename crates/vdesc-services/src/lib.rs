//! External service access for the pipeline.
//!
//! - [`ServicePool`]: bounded-concurrency, health-checked broker over the
//!   caption / rating / detect inference endpoints. The caption service is
//!   fixed at one permit, a hard contract enforced by RAII handles so the
//!   slot is released on every path including errors.
//! - [`InferenceClient`]: the three inference HTTP contracts.
//! - [`GoogleClient`]: narrow REST clients for Cloud Storage, long-running
//!   Speech-to-Text, and Vision text detection.
//!
//! The pool never retries; callers classify failures and decide.

mod clients;
mod error;
mod google;
mod pool;
mod types;

pub use clients::InferenceClient;
pub use error::{ServiceError, ServiceResult};
pub use google::{GoogleClient, GoogleConfig};
pub use pool::{PoolConfig, ServiceConfig, ServiceHandle, ServiceKind, ServicePool};
pub use types::{
    DetectFrameResult, DetectRequest, DetectResponse, NamedConfidence, OcrAnnotation,
    SpeechSegment, SpeechWord,
};
