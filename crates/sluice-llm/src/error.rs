//! Provider error types for sluice-llm.
//!
//! All provider operations return [`Result<T>`] which uses [`ProviderError`]
//! as the error type. The variants map one-to-one onto the retry and
//! circuit-breaker decisions made in [`retry`](crate::retry) and
//! [`circuit_breaker`](crate::circuit_breaker).

use thiserror::Error;

/// Errors that can occur when calling an external provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Transport-level failure (connection reset, refused, dropped mid-stream).
    #[error("network error: {0}")]
    Network(String),

    /// Catch-all failure described only by its message. Classified by
    /// message content.
    #[error("request failed: {0}")]
    RequestFailed(String),

    /// The provider answered with a non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Http {
        /// Response status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// The provider returned a rate-limit response (HTTP 429).
    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited {
        /// Suggested wait time before retrying, in milliseconds.
        retry_after_ms: u64,
    },

    /// A single attempt exceeded its deadline.
    #[error("request timeout")]
    Timeout,

    /// The caller aborted the operation.
    #[error("cancelled")]
    Cancelled,

    /// The provider returned a response that could not be used.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The provider has not been configured (e.g. missing URL).
    #[error("provider not configured: {0}")]
    NotConfigured(String),

    /// The circuit for `name` is open; the call was not attempted.
    #[error("circuit '{name}' is open{}", last_error.as_deref().map(|e| format!(" (last error: {e})")).unwrap_or_default())]
    CircuitOpen {
        /// Logical dependency name.
        name: String,
        /// Message of the failure that last tripped or held the circuit.
        last_error: Option<String>,
    },

    /// Every allowed attempt failed with a retryable error.
    #[error("retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Total attempts made, initial call included.
        attempts: u32,
        /// The error from the final attempt.
        #[source]
        source: Box<ProviderError>,
    },
}

impl ProviderError {
    /// HTTP status associated with this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }

    /// Returns `true` for the circuit-open rejection.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout;
        }
        if let Some(status) = err.status() {
            return Self::Http {
                status: status.as_u16(),
                body: err.to_string(),
            };
        }
        Self::Network(err.to_string())
    }
}

/// A convenience type alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;
