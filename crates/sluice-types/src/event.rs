//! Events delivered to the consumer of an ingested stream.
//!
//! [`StreamEvent::Update`] carries the full visible and thinking text at
//! each flush, so a consumer can re-render without keeping its own state.
//! Successive updates never shrink `content`.

use serde::{Deserialize, Serialize};

use crate::section::Section;

/// A flushed snapshot of stream progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamUpdate {
    /// All visible text decoded so far, markers stripped.
    pub content: String,

    /// Text routed to the thinking buffer so far.
    pub thinking: String,

    /// Sections assembled so far; the last may still be open.
    pub sections: Vec<Section>,

    /// Number of transport chunks consumed.
    pub chunk_count: u64,
}

/// An event emitted while a stream is being consumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A `[STATUS:<word>]` marker was seen.
    Status { status: String },
    /// The parser decided to flush.
    Update(StreamUpdate),
}
