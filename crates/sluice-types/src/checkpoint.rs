//! Stream progress snapshots used for interruption recovery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A snapshot of in-progress stream content.
///
/// At most one checkpoint exists per `stream_id`; saving a newer one
/// supersedes the previous snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Identifier of the stream this snapshot belongs to.
    #[serde(alias = "streamId")]
    pub stream_id: String,

    /// Visible content decoded up to the snapshot.
    pub content: String,

    /// When the snapshot was taken.
    #[serde(default = "Utc::now", alias = "capturedAt")]
    pub captured_at: DateTime<Utc>,

    /// Whether the stream had already finished when captured.
    #[serde(default, alias = "isComplete")]
    pub is_complete: bool,
}

impl Checkpoint {
    /// Create a checkpoint stamped with the current time.
    pub fn new(stream_id: impl Into<String>, content: impl Into<String>, is_complete: bool) -> Self {
        Self {
            stream_id: stream_id.into(),
            content: content.into(),
            captured_at: Utc::now(),
            is_complete,
        }
    }
}
