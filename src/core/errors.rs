// Domain error taxonomy - every failure surfaced to a caller maps onto one kind

use thiserror::Error;

/// Canonical error type for the bridge.
///
/// Every operation returns the `Err` variant of the response envelope built
/// from one of these kinds; no other failure shape escapes the core.
#[derive(Error, Debug, Clone)]
pub enum BridgeError {
    /// Missing/invalid session token, credential refresh failure, or upstream 401/403.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// Caller violated a parameter constraint.
    #[error("Invalid input: {message}")]
    InvalidInput {
        message: String,
        details: Vec<String>,
    },

    /// Local bucket saturation or upstream 429.
    #[error("Rate limit exceeded, retry after {retry_after:.2}s")]
    RateLimitExceeded { retry_after: f64 },

    /// Upstream 4xx (other than auth/429) or 5xx after retries exhausted.
    #[error("Upstream error (HTTP {status}): {message}")]
    Upstream {
        status: u16,
        message: String,
        details: Vec<serde_json::Value>,
    },

    /// Transport failure (DNS, TCP, TLS, read timeout) after retries exhausted.
    #[error("Network error: {0}")]
    Network(String),

    /// Operation deadline exceeded, including cancellation.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Filter expression parse error, evaluation error, or budget breach.
    #[error("Filter failed: {0}")]
    FilterFailed(String),

    /// Unreachable-classification fallback; indicates a bug.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn invalid_input_with(message: impl Into<String>, details: Vec<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            details,
        }
    }

    /// Wire code carried in the envelope's `error` field.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthFailed(_) => "auth_failed",
            Self::InvalidInput { .. } => "invalid_input",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::Upstream { .. } => "upstream_error",
            Self::Network(_) => "network_error",
            Self::Timeout(_) => "timeout",
            Self::FilterFailed(_) => "filter_failed",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether the dispatcher may retry this failure.
    ///
    /// Only upstream 429, retryable 5xx, and transport faults qualify.
    pub fn retryable(&self) -> bool {
        match self {
            Self::RateLimitExceeded { .. } => true,
            Self::Network(_) => true,
            Self::Upstream { status, .. } => matches!(status, 500 | 502 | 503 | 504),
            _ => false,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn retry_after(&self) -> Option<f64> {
        match self {
            Self::RateLimitExceeded { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}
