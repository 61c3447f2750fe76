//! Closed error taxonomy for the API client.
//!
//! Every failure mode is a tagged variant; callers branch on variants and
//! fields, never on message text. The taxonomy is `Clone` so that
//! deduplicated callers can each receive the settled error.

use std::time::Duration;

use thiserror::Error;

use breakwater_resilience::retry::RetryPolicy;

/// Errors surfaced by [`ApiClient`](crate::client::ApiClient) operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// The attempt did not complete within its time budget
    #[error("request timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// The transport failed before an HTTP status was received
    #[error("network error: {message}")]
    Network { message: String },

    /// The server answered with a non-success status
    #[error("HTTP {status}: {message}")]
    Status {
        status: u16,
        /// Human-readable, locale-resolved description
        message: String,
        /// Raw response body, for callers that parse error payloads
        body: String,
    },

    /// The response parsed but failed the caller's validation
    #[error("response validation failed: {}", errors.join("; "))]
    Validation { errors: Vec<String> },

    /// The circuit breaker rejected the call without sending it
    #[error("circuit open, retry after {retry_after:?}")]
    CircuitOpen { retry_after: Duration },

    /// The response body could not be decoded into the requested type
    #[error("failed to decode response body: {message}")]
    Decode { message: String },

    /// The request could not be constructed
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
}

impl ApiError {
    /// Whether retrying this error could plausibly succeed
    ///
    /// Transient: timeouts, transport failures, and HTTP 408/429/5xx.
    /// Everything else, including an open circuit, is terminal for the
    /// current call.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Timeout { .. } | ApiError::Network { .. } => true,
            ApiError::Status { status, .. } => {
                matches!(status, 408 | 429) || (500..=599).contains(status)
            }
            _ => false,
        }
    }

    /// The HTTP status, when the server produced one
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// How long to wait before the circuit admits calls again
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::CircuitOpen { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Default retry classification: retry exactly the transient errors
#[derive(Debug, Clone, Copy, Default)]
pub struct TransientRetry;

impl RetryPolicy<ApiError> for TransientRetry {
    fn should_retry(&self, error: &ApiError, _attempt: u32) -> bool {
        error.is_transient()
    }
}
