//! Checkpoint persistence for interrupted streams.
//!
//! [`CheckpointRecovery`] saves a snapshot of visible content every
//! `interval` chunks. When the transport fails mid-stream, the last
//! snapshot is loaded once and discarded, and the stream is reported as a
//! partial success. Stores are pluggable through [`CheckpointStore`].
//!
//! Checkpointing is best-effort: store failures are logged and never fail
//! the stream they belong to.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use sluice_llm::{CircuitBreaker, ProviderError};
use sluice_types::{Checkpoint, Result};

/// Chunks between checkpoints when not configured.
pub const DEFAULT_CHECKPOINT_INTERVAL: u64 = 100;

// ── Stores ───────────────────────────────────────────────────────────────

/// Storage backend for checkpoints, keyed by stream id.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Store `checkpoint`, replacing any previous one for the same stream.
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()>;

    async fn load(&self, stream_id: &str) -> Result<Option<Checkpoint>>;

    /// Remove the checkpoint for `stream_id`. Missing entries are not an error.
    async fn clear(&self, stream_id: &str) -> Result<()>;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    entries: DashMap<String, Checkpoint>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.entries
            .insert(checkpoint.stream_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, stream_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self.entries.get(stream_id).map(|c| c.clone()))
    }

    async fn clear(&self, stream_id: &str) -> Result<()> {
        self.entries.remove(stream_id);
        Ok(())
    }
}

/// One JSON file per stream under a directory.
///
/// Writes go to a temporary file that is renamed into place, so a crash
/// never leaves a half-written checkpoint behind.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File path for `stream_id`.
    ///
    /// ASCII alphanumerics, `-` and `_` are kept; every other byte is
    /// written as `~xx`, so distinct ids never share a file.
    pub fn path_for(&self, stream_id: &str) -> PathBuf {
        let mut name = String::with_capacity(stream_id.len() + 5);
        for b in stream_id.bytes() {
            if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
                name.push(b as char);
            } else {
                name.push_str(&format!("~{b:02x}"));
            }
        }
        if name.is_empty() {
            name.push('~');
        }
        name.push_str(".json");
        self.dir.join(name)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&checkpoint.stream_id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(checkpoint)?;
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn load(&self, stream_id: &str) -> Result<Option<Checkpoint>> {
        let path = self.path_for(stream_id);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    async fn clear(&self, stream_id: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(stream_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ── Recovery ─────────────────────────────────────────────────────────────

/// Periodic checkpointing and one-shot recovery for streams.
#[derive(Clone)]
pub struct CheckpointRecovery {
    store: Arc<dyn CheckpointStore>,
    interval: u64,
    breaker: Option<CircuitBreaker>,
}

impl Default for CheckpointRecovery {
    fn default() -> Self {
        Self::new(Arc::new(InMemoryCheckpointStore::new()))
    }
}

impl CheckpointRecovery {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            store,
            interval: DEFAULT_CHECKPOINT_INTERVAL,
            breaker: None,
        }
    }

    /// Chunks between checkpoints. Values below 1 are treated as 1.
    pub fn with_interval(mut self, interval: u64) -> Self {
        self.interval = interval.max(1);
        self
    }

    /// Route store calls through a breaker (typically `persistence`).
    pub fn with_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    /// Whether a checkpoint is due after `chunk_count` chunks.
    pub fn is_due(&self, chunk_count: u64) -> bool {
        chunk_count > 0 && chunk_count % self.interval == 0
    }

    async fn guarded<T, F, Fut>(&self, op: &'static str, f: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match &self.breaker {
            Some(breaker) => {
                breaker
                    .execute_or_none(move || async move {
                        f().await
                            .map_err(|e| ProviderError::RequestFailed(format!("checkpoint {op}: {e}")))
                    })
                    .await
            }
            None => match f().await {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(op, error = %e, "checkpoint store call failed");
                    None
                }
            },
        }
    }

    /// Save a snapshot. Returns `false` if the store failed.
    pub async fn save(&self, stream_id: &str, content: &str, is_complete: bool) -> bool {
        let checkpoint = Checkpoint::new(stream_id, content, is_complete);
        let saved = self
            .guarded("save", || self.store.save(&checkpoint))
            .await
            .is_some();
        if saved {
            debug!(stream_id, chars = content.len(), "checkpoint saved");
        }
        saved
    }

    /// Save only when `chunk_count` lands on the interval.
    pub async fn maybe_save(&self, stream_id: &str, chunk_count: u64, content: &str) -> bool {
        if !self.is_due(chunk_count) {
            return false;
        }
        self.save(stream_id, content, false).await
    }

    /// Read the snapshot without discarding it. Store failures read as `None`.
    pub async fn load(&self, stream_id: &str) -> Option<Checkpoint> {
        self.guarded("load", || self.store.load(stream_id))
            .await
            .flatten()
    }

    /// Read the snapshot once and discard it.
    pub async fn recover(&self, stream_id: &str) -> Option<Checkpoint> {
        let checkpoint = self.load(stream_id).await?;
        self.clear(stream_id).await;
        info!(
            stream_id,
            chars = checkpoint.content.len(),
            captured_at = %checkpoint.captured_at,
            "recovered stream from checkpoint"
        );
        Some(checkpoint)
    }

    pub async fn clear(&self, stream_id: &str) {
        self.guarded("clear", || self.store.clear(stream_id)).await;
    }
}

impl std::fmt::Debug for CheckpointRecovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointRecovery")
            .field("interval", &self.interval)
            .field("breaker", &self.breaker.as_ref().map(|b| b.name()))
            .finish()
    }
}
