//! Configuration schema types.
//!
//! All structs support both `snake_case` and `camelCase` field names in
//! JSON via `#[serde(alias)]`. Unknown fields are silently ignored for
//! forward compatibility.
//!
//! # Module Structure
//!
//! - [`resilience`] -- Rate-limit, circuit-breaker and retry settings
//! - [`presets`] -- Built-in per-endpoint and per-dependency presets

pub mod presets;
pub mod resilience;

pub use resilience::*;

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SluiceError};

// ── Root config ──────────────────────────────────────────────────────────

/// Root configuration for sluice.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Rate-limit overrides keyed by endpoint. Merged over the built-ins.
    #[serde(default, alias = "rateLimits")]
    pub rate_limits: HashMap<String, RateLimitSettings>,

    /// Circuit-breaker overrides keyed by dependency. Merged over the built-ins.
    #[serde(default)]
    pub breakers: HashMap<String, BreakerSettings>,

    /// Retry behaviour for provider calls.
    #[serde(default)]
    pub retry: RetrySettings,

    /// Stream parsing and checkpoint cadence.
    #[serde(default)]
    pub stream: StreamSettings,

    /// Generative content provider endpoint.
    #[serde(default)]
    pub provider: ProviderEndpointConfig,
}

impl Config {
    /// Parse a config from JSON text and validate it.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Built-in rate-limit presets with user overrides applied.
    pub fn resolved_rate_limits(&self) -> HashMap<String, RateLimitSettings> {
        let mut merged = presets::builtin_rate_limits();
        merged.extend(self.rate_limits.clone());
        merged
    }

    /// Built-in breaker presets with user overrides applied.
    pub fn resolved_breakers(&self) -> HashMap<String, BreakerSettings> {
        let mut merged = presets::builtin_breakers();
        merged.extend(self.breakers.clone());
        merged
    }

    /// Settings for `endpoint`, falling back to the `default` preset.
    pub fn rate_limit_for(&self, endpoint: &str) -> RateLimitSettings {
        let mut merged = self.resolved_rate_limits();
        merged
            .remove(endpoint)
            .or_else(|| merged.remove(presets::DEFAULT_PRESET))
            .unwrap_or_default()
    }

    /// Settings for breaker `name`, falling back to the `default` preset.
    pub fn breaker_for(&self, name: &str) -> BreakerSettings {
        let merged = self.resolved_breakers();
        merged
            .get(name)
            .or_else(|| merged.get(presets::DEFAULT_PRESET))
            .copied()
            .unwrap_or_default()
    }

    /// Reject values that would make a component misbehave.
    pub fn validate(&self) -> Result<()> {
        for (endpoint, rl) in &self.rate_limits {
            if rl.window_ms == 0 {
                return Err(SluiceError::ConfigInvalid {
                    reason: format!("rate limit '{endpoint}': window_ms must be positive"),
                });
            }
        }
        for (name, b) in &self.breakers {
            if b.failure_threshold == 0 || b.success_threshold == 0 {
                return Err(SluiceError::ConfigInvalid {
                    reason: format!("breaker '{name}': thresholds must be at least 1"),
                });
            }
        }
        if self.stream.checkpoint_interval == 0 {
            return Err(SluiceError::ConfigInvalid {
                reason: "stream.checkpoint_interval must be at least 1".into(),
            });
        }
        Ok(())
    }
}

// ── Stream ───────────────────────────────────────────────────────────────

/// Flush batching and checkpoint cadence for stream consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Unflushed characters that force a flush.
    #[serde(default = "default_flush_min_chars", alias = "flushMinChars")]
    pub flush_min_chars: usize,

    /// Longest gap between flushes while output is pending, in milliseconds.
    #[serde(default = "default_flush_interval_ms", alias = "flushIntervalMs")]
    pub flush_interval_ms: u64,

    /// Chunks between checkpoints.
    #[serde(default = "default_checkpoint_interval", alias = "checkpointInterval")]
    pub checkpoint_interval: u64,

    /// Longest marker body held back while waiting for its closing bracket.
    #[serde(default = "default_max_marker_len", alias = "maxMarkerLen")]
    pub max_marker_len: usize,
}

fn default_flush_min_chars() -> usize {
    50
}
/// Three 16ms batching ticks.
fn default_flush_interval_ms() -> u64 {
    48
}
fn default_checkpoint_interval() -> u64 {
    100
}
fn default_max_marker_len() -> usize {
    64 * 1024
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            flush_min_chars: default_flush_min_chars(),
            flush_interval_ms: default_flush_interval_ms(),
            checkpoint_interval: default_checkpoint_interval(),
            max_marker_len: default_max_marker_len(),
        }
    }
}

impl StreamSettings {
    /// Flush interval as a [`Duration`].
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

// ── Provider ─────────────────────────────────────────────────────────────

/// How to reach the generative content provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEndpointConfig {
    /// Human-readable provider name, also used as the breaker key.
    #[serde(default = "default_provider_name")]
    pub name: String,

    /// Streaming endpoint URL.
    #[serde(default)]
    pub url: Option<String>,

    /// Environment variable holding a bearer token, if the endpoint needs one.
    #[serde(default, alias = "apiKeyEnv")]
    pub api_key_env: Option<String>,

    /// Extra HTTP headers sent with every request.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Connect timeout in seconds.
    #[serde(default, alias = "connectTimeoutSecs")]
    pub connect_timeout_secs: Option<u64>,
}

fn default_provider_name() -> String {
    presets::LLM_PROVIDER.into()
}

impl Default for ProviderEndpointConfig {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            url: None,
            api_key_env: None,
            headers: HashMap::new(),
            connect_timeout_secs: None,
        }
    }
}
