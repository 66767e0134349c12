//! Error types for the sluice framework.
//!
//! [`SluiceError`] covers failures that are not tied to a provider call:
//! configuration, checkpoint storage, and serialization. Provider-side
//! failures live in `sluice_llm::ProviderError`.

use thiserror::Error;

/// Top-level error type for the sluice framework.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SluiceError {
    /// Configuration is malformed or semantically invalid.
    #[error("invalid config: {reason}")]
    ConfigInvalid {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// A checkpoint store could not complete an operation.
    #[error("checkpoint store error: {reason}")]
    Store {
        /// Store-specific failure description.
        reason: String,
    },

    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SluiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_invalid_display() {
        let err = SluiceError::ConfigInvalid {
            reason: "window_ms must be positive".into(),
        };
        assert_eq!(err.to_string(), "invalid config: window_ms must be positive");
    }

    #[test]
    fn store_display() {
        let err = SluiceError::Store {
            reason: "disk full".into(),
        };
        assert_eq!(err.to_string(), "checkpoint store error: disk full");
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: SluiceError = io_err.into();
        assert!(matches!(err, SluiceError::Io(_)));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{{bad}}").unwrap_err();
        let err: SluiceError = json_err.into();
        assert!(matches!(err, SluiceError::Json(_)));
    }
}
