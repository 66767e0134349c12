//! Errors surfaced by the ingestion pipeline.

use thiserror::Error;

use sluice_llm::ProviderError;
use sluice_types::SluiceError;

/// Why a stream could not be ingested.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum IngestError {
    /// The caller exceeded its rate limit; the provider was not contacted.
    #[error("rate limit exceeded for '{endpoint}': retry after {retry_after_secs}s")]
    RateLimited {
        endpoint: String,
        retry_after_secs: u64,
    },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Config(#[from] SluiceError),
}

impl IngestError {
    /// Whether the caller aborted the stream.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, IngestError::Provider(ProviderError::Cancelled))
    }
}

/// Convenience alias used throughout sluice-core.
pub type Result<T> = std::result::Result<T, IngestError>;
