//! # sluice-types
//!
//! Core type definitions for the sluice streaming-ingestion layer.
//!
//! This crate is the foundation of the dependency graph -- all other
//! sluice crates depend on it. It contains:
//!
//! - **[`error`]** -- [`SluiceError`], the top-level error type
//! - **[`config`]** -- Configuration schema and built-in presets
//! - **[`section`]** -- Display sections assembled from a stream
//! - **[`checkpoint`]** -- Stream progress snapshots
//! - **[`event`]** -- Incremental updates delivered to consumers

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod event;
pub mod section;

pub use checkpoint::Checkpoint;
pub use config::{BackoffStrategy, BreakerSettings, Config, RateLimitSettings, RetrySettings, Tier};
pub use error::{Result, SluiceError};
pub use event::{StreamEvent, StreamUpdate};
pub use section::{Section, SectionKind};
