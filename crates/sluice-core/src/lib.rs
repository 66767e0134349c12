//! # sluice-core
//!
//! Streaming ingestion engine for sluice.
//!
//! Contains the incremental marker parser, the per-caller rate limiter,
//! checkpoint persistence and recovery, and the [`StreamIngestor`] that
//! drives a provider stream through all of them.

pub mod checkpoint;
pub mod error;
pub mod ingest;
pub mod parser;
pub mod rate_limiter;

pub use checkpoint::{CheckpointRecovery, CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
pub use error::{IngestError, Result};
pub use ingest::{IngestOutcome, IngestRequest, RateLimitKey, StreamIngestor};
pub use parser::{ConsumeOutcome, ParserSettings, StreamParser, StreamState};
pub use rate_limiter::{RateLimitDecision, RateLimitOutcome, RateLimiter};
