//! End-to-end stream ingestion.
//!
//! [`StreamIngestor`] composes the resilience primitives around one
//! provider stream:
//!
//! 1. rate-limit check for the caller (optional, per request)
//! 2. open the stream: retry outside, circuit breaker inside
//! 3. feed chunks to the [`StreamParser`] in arrival order, emitting
//!    [`StreamEvent`]s and saving checkpoints on the configured cadence
//! 4. finalize, clear the checkpoint and return the [`IngestOutcome`]
//!
//! A transport failure after the stream opened falls back to the last
//! checkpoint when one exists. Cancellation is honoured between chunks
//! and is never counted against the provider's circuit. Output left
//! pending by a quiet provider is flushed once the flush interval passes.

use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sluice_llm::{BreakerRegistry, GenerationRequest, ProviderError, RetryPolicy, StreamProvider};
use sluice_types::config::presets::PERSISTENCE;
use sluice_types::{Config, Section, StreamEvent, Tier};

use crate::checkpoint::CheckpointRecovery;
use crate::error::{IngestError, Result};
use crate::parser::{ParserSettings, StreamParser, StreamState};
use crate::rate_limiter::{RateLimiter, log_rejection};

// ── Request / outcome ────────────────────────────────────────────────────

/// Who is asking, for rate limiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitKey {
    pub endpoint: String,
    pub identifier: String,
    pub tier: Option<Tier>,
}

impl RateLimitKey {
    pub fn new(endpoint: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            identifier: identifier.into(),
            tier: None,
        }
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }
}

/// One stream to ingest.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    /// Checkpoint key. Unique per stream.
    pub stream_id: String,
    pub request: GenerationRequest,
    /// `None` when the caller already enforced limits at its boundary.
    pub rate_limit: Option<RateLimitKey>,
}

impl IngestRequest {
    /// Request with a fresh random stream id and no rate limiting.
    pub fn new(request: GenerationRequest) -> Self {
        Self {
            stream_id: uuid::Uuid::new_v4().to_string(),
            request,
            rate_limit: None,
        }
    }

    pub fn with_stream_id(mut self, stream_id: impl Into<String>) -> Self {
        self.stream_id = stream_id.into();
        self
    }

    pub fn with_rate_limit(mut self, key: RateLimitKey) -> Self {
        self.rate_limit = Some(key);
        self
    }
}

/// Terminal result of a stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestOutcome {
    pub stream_id: String,
    pub content: String,
    pub thinking: String,
    pub sections: Vec<Section>,
    pub products: Vec<serde_json::Value>,
    /// Chunks received before the stream ended or failed.
    pub chunk_count: u64,
    /// Content came from a checkpoint after a mid-stream failure.
    pub recovered: bool,
}

impl IngestOutcome {
    fn from_state(stream_id: &str, state: StreamState, chunk_count: u64, recovered: bool) -> Self {
        Self {
            stream_id: stream_id.to_string(),
            content: state.full_content().to_string(),
            thinking: state.thinking().to_string(),
            sections: state.sections().to_vec(),
            products: state.products().to_vec(),
            chunk_count,
            recovered,
        }
    }
}

// ── Ingestor ─────────────────────────────────────────────────────────────

/// Runs provider streams through rate limiting, retry, circuit breaking,
/// parsing and checkpointing.
///
/// Cheap to share behind an `Arc`; the limiter and breaker registry are
/// process-wide and may be shared with other components.
#[derive(Clone)]
pub struct StreamIngestor {
    provider: Arc<dyn StreamProvider>,
    limiter: Arc<RateLimiter>,
    breakers: Arc<BreakerRegistry>,
    retry: RetryPolicy,
    parser: StreamParser,
    checkpoints: CheckpointRecovery,
}

impl StreamIngestor {
    /// Ingestor with built-in presets and an in-memory checkpoint store.
    pub fn new(provider: Arc<dyn StreamProvider>) -> Self {
        let retry = RetryPolicy::new(Default::default()).with_label(provider.name());
        Self {
            provider,
            limiter: Arc::new(RateLimiter::new()),
            breakers: Arc::new(BreakerRegistry::new()),
            retry,
            parser: StreamParser::default(),
            checkpoints: CheckpointRecovery::default(),
        }
    }

    /// Build every component from `config`.
    ///
    /// Checkpoint store calls go through the `persistence` breaker.
    pub fn from_config(provider: Arc<dyn StreamProvider>, config: &Config) -> Result<Self> {
        config.validate()?;
        let breakers = Arc::new(BreakerRegistry::with_presets(config.resolved_breakers()));
        let checkpoints = CheckpointRecovery::default()
            .with_interval(config.stream.checkpoint_interval)
            .with_breaker(breakers.breaker(PERSISTENCE));
        let retry = RetryPolicy::new(config.retry).with_label(provider.name());

        Ok(Self {
            provider,
            limiter: Arc::new(RateLimiter::with_presets(config.resolved_rate_limits())),
            breakers,
            retry,
            parser: StreamParser::new(ParserSettings::from(&config.stream)),
            checkpoints,
        })
    }

    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_breakers(mut self, breakers: Arc<BreakerRegistry>) -> Self {
        self.breakers = breakers;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_parser(mut self, parser: StreamParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_checkpoints(mut self, checkpoints: CheckpointRecovery) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    pub fn provider(&self) -> &Arc<dyn StreamProvider> {
        &self.provider
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub fn checkpoints(&self) -> &CheckpointRecovery {
        &self.checkpoints
    }

    /// Ingest one stream, sending incremental events to `events`.
    ///
    /// Events for a stream are sent in chunk order. Dropping the receiver
    /// cancels the stream. Status markers are forwarded as they are seen;
    /// updates follow the parser's flush policy, with one last update for
    /// any output still pending when the provider finishes.
    ///
    /// # Errors
    ///
    /// - [`IngestError::RateLimited`] when the caller is over quota
    /// - [`IngestError::Provider`] for open failures (after retries), an
    ///   open circuit, cancellation, or a mid-stream failure with no
    ///   checkpoint to fall back on
    pub async fn ingest(
        &self,
        req: IngestRequest,
        events: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> Result<IngestOutcome> {
        let stream_id = req.stream_id.as_str();

        if let Some(ref key) = req.rate_limit {
            let decision = self.limiter.check(&key.endpoint, &key.identifier, key.tier);
            if !decision.allowed {
                log_rejection(&key.endpoint, &key.identifier, &decision);
                return Err(IngestError::RateLimited {
                    endpoint: key.endpoint.clone(),
                    retry_after_secs: decision.retry_after_secs.unwrap_or(1),
                });
            }
        }

        let breaker = self.breakers.breaker(self.provider.name());
        let open = self
            .retry
            .execute_guarded(&breaker, || self.provider.open_stream(&req.request));

        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(stream_id, "cancelled while opening stream");
                return Err(ProviderError::Cancelled.into());
            }
            opened = open => opened?,
        };
        info!(stream_id, provider = self.provider.name(), "stream opened");

        let mut state = self.parser.new_state();
        loop {
            let flush_at = self.parser.flush_deadline(&state);
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(stream_id, chunks = state.chunk_count(), "stream cancelled");
                    return Err(ProviderError::Cancelled.into());
                }
                _ = tokio::time::sleep_until(flush_at.unwrap_or_else(Instant::now).into()),
                    if flush_at.is_some() =>
                {
                    if self.parser.flush_due_at(&mut state, Instant::now()) {
                        send(&events, StreamEvent::Update(state.update())).await?;
                    }
                    continue;
                }
                next = stream.next() => next,
            };

            let chunk = match next {
                Some(Ok(chunk)) => chunk,
                Some(Err(err)) => {
                    warn!(
                        stream_id,
                        chunks = state.chunk_count(),
                        error = %err,
                        "stream interrupted"
                    );
                    return match self.recover(stream_id).await {
                        Some(mut outcome) => {
                            outcome.chunk_count = state.chunk_count();
                            Ok(outcome)
                        }
                        None => Err(err.into()),
                    };
                }
                None => break,
            };

            let outcome = self.parser.consume(&mut state, &chunk);
            for status in outcome.statuses {
                send(&events, StreamEvent::Status { status }).await?;
            }
            if outcome.should_flush {
                send(&events, StreamEvent::Update(state.update())).await?;
            }
            self.checkpoints
                .maybe_save(stream_id, state.chunk_count(), state.full_content())
                .await;
        }

        if state.has_unflushed() {
            send(&events, StreamEvent::Update(state.update())).await?;
        }
        self.parser.finalize(&mut state);
        self.checkpoints.clear(stream_id).await;

        info!(
            stream_id,
            chunks = state.chunk_count(),
            sections = state.sections().len(),
            "stream complete"
        );
        let chunk_count = state.chunk_count();
        Ok(IngestOutcome::from_state(stream_id, state, chunk_count, false))
    }

    /// Rebuild a finalized outcome from the last checkpoint of
    /// `stream_id`, consuming the checkpoint.
    ///
    /// Also usable after a restart to salvage a stream that never
    /// finished. Thinking and products are not checkpointed and come back
    /// empty.
    pub async fn recover(&self, stream_id: &str) -> Option<IngestOutcome> {
        let checkpoint = self.checkpoints.recover(stream_id).await?;
        let state = self.parser.restore(&checkpoint.content);
        Some(IngestOutcome::from_state(stream_id, state, 0, true))
    }
}

impl std::fmt::Debug for StreamIngestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamIngestor")
            .field("provider", &self.provider.name())
            .field("retry", &self.retry)
            .field("parser", &self.parser)
            .field("checkpoints", &self.checkpoints)
            .finish()
    }
}

/// A closed receiver means nobody is listening any more.
async fn send(events: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> Result<()> {
    events
        .send(event)
        .await
        .map_err(|_| IngestError::Provider(ProviderError::Cancelled))
}
