//! Service error types.

use thiserror::Error;

use crate::pool::ServiceKind;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("{kind} service returned {status}: {body}")]
    RequestFailed {
        kind: ServiceKind,
        status: u16,
        body: String,
    },

    #[error("{0} service is unhealthy")]
    Unhealthy(ServiceKind),

    #[error("No {0} service configured")]
    Unconfigured(ServiceKind),

    #[error("Timed out waiting for a {0} slot")]
    AcquireTimeout(ServiceKind),

    #[error("Bad response from {kind}: {reason}")]
    BadResponse { kind: ServiceKind, reason: String },

    #[error("Google API returned {status}: {body}")]
    Google { status: u16, body: String },

    #[error("Google auth error: {0}")]
    Auth(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    pub fn bad_response(kind: ServiceKind, reason: impl Into<String>) -> Self {
        Self::BadResponse {
            kind,
            reason: reason.into(),
        }
    }

    /// Whether a retry can plausibly succeed. 5xx and network failures are
    /// transient; 4xx is deterministic and must not be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            ServiceError::Network(e) => {
                e.is_timeout() || e.is_connect() || e.is_request() || e.is_body()
            }
            ServiceError::RequestFailed { status, .. } => *status >= 500,
            ServiceError::Google { status, .. } => *status >= 500 || *status == 429,
            ServiceError::Unhealthy(_) | ServiceError::AcquireTimeout(_) => true,
            ServiceError::Unconfigured(_)
            | ServiceError::BadResponse { .. }
            | ServiceError::Auth(_)
            | ServiceError::Io(_) => false,
        }
    }
}
