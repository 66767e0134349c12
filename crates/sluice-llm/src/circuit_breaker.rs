//! Named circuit breakers for external dependencies.
//!
//! A [`BreakerRegistry`] holds one [`CircuitRecord`] per logical
//! dependency name. Records are created lazily on first use and live until
//! the registry is dropped or [`BreakerRegistry::reset`] is called.
//!
//! # State machine
//!
//! ```text
//!            failures >= failure_threshold
//!   CLOSED ─────────────────────────────────► OPEN
//!     ▲                                        │  reset_timeout elapsed,
//!     │ successes >= success_threshold         │  next call is the probe
//!     │                                        ▼
//!     └──────────────────────────────────── HALF_OPEN
//!                  any failure ───────────► OPEN (timer restarts)
//! ```
//!
//! State transitions for one name happen under that name's map shard lock,
//! so two concurrent failures can never both observe the same
//! pre-increment count. The wrapped call itself runs without holding any
//! lock.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use sluice_types::config::BreakerSettings;
use sluice_types::config::presets::{self, DEFAULT_PRESET};

use crate::error::{ProviderError, Result};

// ── State ────────────────────────────────────────────────────────────────

/// Breaker state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        };
        f.write_str(s)
    }
}

/// Mutable state for one named breaker.
#[derive(Debug, Clone, Default)]
pub struct CircuitRecord {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_failure_at: Option<Instant>,
    pub last_error: Option<String>,
}

/// Serializable view of a [`CircuitRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    /// Milliseconds since the last recorded failure.
    pub last_failure_ago_ms: Option<u64>,
    pub last_error: Option<String>,
}

impl CircuitSnapshot {
    fn from_record(name: &str, record: &CircuitRecord, now: Instant) -> Self {
        Self {
            name: name.to_string(),
            state: record.state,
            consecutive_failures: record.consecutive_failures,
            consecutive_successes: record.consecutive_successes,
            last_failure_ago_ms: record
                .last_failure_at
                .map(|t| now.saturating_duration_since(t).as_millis() as u64),
            last_error: record.last_error.clone(),
        }
    }
}

// ── Registry ─────────────────────────────────────────────────────────────

/// Process-wide store of breaker records keyed by dependency name.
#[derive(Debug)]
pub struct BreakerRegistry {
    records: DashMap<String, CircuitRecord>,
    presets: HashMap<String, BreakerSettings>,
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BreakerRegistry {
    /// Registry seeded with the built-in presets.
    pub fn new() -> Self {
        Self::with_presets(presets::builtin_breakers())
    }

    /// Registry with caller-supplied presets (e.g. from `Config::resolved_breakers`).
    pub fn with_presets(presets: HashMap<String, BreakerSettings>) -> Self {
        Self {
            records: DashMap::new(),
            presets,
        }
    }

    /// Settings for `name`, falling back to the `default` preset.
    pub fn settings_for(&self, name: &str) -> BreakerSettings {
        self.presets
            .get(name)
            .or_else(|| self.presets.get(DEFAULT_PRESET))
            .copied()
            .unwrap_or_default()
    }

    /// A handle for `name` using its preset.
    pub fn breaker(self: &Arc<Self>, name: &str) -> CircuitBreaker {
        let settings = self.settings_for(name);
        self.breaker_with(name, settings)
    }

    /// A handle for `name` with call-site settings.
    pub fn breaker_with(self: &Arc<Self>, name: &str, settings: BreakerSettings) -> CircuitBreaker {
        CircuitBreaker {
            registry: Arc::clone(self),
            name: name.to_string(),
            settings,
        }
    }

    /// Current state of `name`. Unknown names are CLOSED.
    pub fn state(&self, name: &str) -> CircuitState {
        self.records
            .get(name)
            .map(|r| r.state)
            .unwrap_or_default()
    }

    pub fn snapshot(&self, name: &str) -> Option<CircuitSnapshot> {
        let now = Instant::now();
        self.records
            .get(name)
            .map(|r| CircuitSnapshot::from_record(name, &r, now))
    }

    /// Snapshots of every known breaker, sorted by name.
    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let now = Instant::now();
        let mut all: Vec<CircuitSnapshot> = self
            .records
            .iter()
            .map(|entry| CircuitSnapshot::from_record(entry.key(), entry.value(), now))
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Forget the record for `name`. Returns `true` if one existed.
    pub fn reset(&self, name: &str) -> bool {
        let existed = self.records.remove(name).is_some();
        if existed {
            info!(breaker = %name, "circuit reset");
        }
        existed
    }

    pub fn reset_all(&self) {
        self.records.clear();
        info!("all circuits reset");
    }

    /// Admit or reject a call. An OPEN circuit whose reset timeout has
    /// elapsed moves to HALF_OPEN and admits this call as the probe.
    pub(crate) fn try_acquire(
        &self,
        name: &str,
        settings: &BreakerSettings,
        now: Instant,
    ) -> Result<()> {
        let mut record = self.records.entry(name.to_string()).or_default();
        match record.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let cooled = record
                    .last_failure_at
                    .is_none_or(|t| now.saturating_duration_since(t) >= settings.reset_timeout());
                if cooled {
                    record.state = CircuitState::HalfOpen;
                    record.consecutive_successes = 0;
                    info!(breaker = %name, "circuit half-open, admitting probe");
                    Ok(())
                } else {
                    Err(ProviderError::CircuitOpen {
                        name: name.to_string(),
                        last_error: record.last_error.clone(),
                    })
                }
            }
        }
    }

    pub(crate) fn on_success(&self, name: &str, settings: &BreakerSettings) {
        let mut record = self.records.entry(name.to_string()).or_default();
        match record.state {
            CircuitState::Closed => {
                record.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                record.consecutive_successes += 1;
                if record.consecutive_successes >= settings.success_threshold {
                    record.state = CircuitState::Closed;
                    record.consecutive_failures = 0;
                    record.consecutive_successes = 0;
                    record.last_error = None;
                    info!(breaker = %name, "circuit closed");
                }
            }
            // A call admitted before the circuit opened; the open decision stands.
            CircuitState::Open => {}
        }
    }

    pub(crate) fn on_failure(
        &self,
        name: &str,
        settings: &BreakerSettings,
        err: &ProviderError,
        now: Instant,
    ) {
        let mut record = self.records.entry(name.to_string()).or_default();
        record.last_error = Some(err.to_string());
        match record.state {
            CircuitState::Closed => {
                record.consecutive_failures += 1;
                record.last_failure_at = Some(now);
                if record.consecutive_failures >= settings.failure_threshold {
                    record.state = CircuitState::Open;
                    warn!(
                        breaker = %name,
                        failures = record.consecutive_failures,
                        error = %err,
                        "circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                record.state = CircuitState::Open;
                record.consecutive_successes = 0;
                record.last_failure_at = Some(now);
                warn!(breaker = %name, error = %err, "probe failed, circuit re-opened");
            }
            CircuitState::Open => {}
        }
    }
}

// ── Handle ───────────────────────────────────────────────────────────────

/// A named breaker bound to its settings. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    registry: Arc<BreakerRegistry>,
    name: String,
    settings: BreakerSettings,
}

impl CircuitBreaker {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &BreakerSettings {
        &self.settings
    }

    pub fn state(&self) -> CircuitState {
        self.registry.state(&self.name)
    }

    /// Run `op` through the breaker.
    ///
    /// When the circuit is open, returns [`ProviderError::CircuitOpen`]
    /// without invoking `op`. A [`ProviderError::Cancelled`] result is
    /// passed through without being counted either way.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_within(None, op).await
    }

    /// Like [`execute`](Self::execute), but a call still running after
    /// `limit` is abandoned and recorded as [`ProviderError::Timeout`].
    pub async fn execute_within<T, F, Fut>(&self, limit: Option<Duration>, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.registry
            .try_acquire(&self.name, &self.settings, Instant::now())?;

        let outcome = match limit {
            Some(limit) => tokio::time::timeout(limit, op())
                .await
                .unwrap_or(Err(ProviderError::Timeout)),
            None => op().await,
        };

        match outcome {
            Ok(value) => {
                self.registry.on_success(&self.name, &self.settings);
                Ok(value)
            }
            Err(ProviderError::Cancelled) => Err(ProviderError::Cancelled),
            Err(err) => {
                self.registry
                    .on_failure(&self.name, &self.settings, &err, Instant::now());
                Err(err)
            }
        }
    }

    /// Like [`execute`](Self::execute) but degrades every failure to `None`.
    ///
    /// For optional dependencies. Circuit-open rejections are silent; other
    /// errors are logged.
    pub async fn execute_or_none<T, F, Fut>(&self, op: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match self.execute(op).await {
            Ok(value) => Some(value),
            Err(ProviderError::CircuitOpen { .. }) => {
                debug!(breaker = %self.name, "circuit open, skipping optional call");
                None
            }
            Err(err) => {
                warn!(breaker = %self.name, error = %err, "optional call failed");
                None
            }
        }
    }
}
