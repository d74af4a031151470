use serde::{Deserialize, Serialize};

/// Failure of a single backend call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum GatewayError {
    #[error("{endpoint}: http status {status}")]
    Status { endpoint: String, status: u16 },
    #[error("{endpoint}: timed out")]
    Timeout { endpoint: String },
    #[error("{endpoint}: transport: {message}")]
    Transport { endpoint: String, message: String },
    #[error("{endpoint}: decode: {message}")]
    Decode { endpoint: String, message: String },
}

impl GatewayError {
    pub fn endpoint(&self) -> &str {
        match self {
            GatewayError::Status { endpoint, .. }
            | GatewayError::Timeout { endpoint }
            | GatewayError::Transport { endpoint, .. }
            | GatewayError::Decode { endpoint, .. } => endpoint,
        }
    }
}

/// Query-level failure of a whole bundle. Sub-fetch failures never surface here.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum BundleError {
    #[error("{bundle}: all {failed} sources failed")]
    Unavailable { bundle: String, failed: usize },
    #[error("{bundle}: {source}")]
    Source { bundle: String, source: GatewayError },
    #[error("{bundle}: fetch aborted")]
    Aborted { bundle: String },
}
