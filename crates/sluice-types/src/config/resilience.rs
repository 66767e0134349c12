//! Rate-limit, circuit-breaker and retry settings.
//!
//! Every struct here deserializes from both `snake_case` and `camelCase`
//! keys and fills missing fields from its defaults, so a config file only
//! needs to name what it overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ── Rate limiting ────────────────────────────────────────────────────────

/// Caller classification used to scale rate-limit thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Pro,
    Enterprise,
}

impl Tier {
    /// Parse a tier name case-insensitively. Unknown names yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "free" => Some(Self::Free),
            "pro" => Some(Self::Pro),
            "enterprise" => Some(Self::Enterprise),
            _ => None,
        }
    }
}

/// Per-tier request limits for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimits {
    pub free: u32,
    pub pro: u32,
    pub enterprise: u32,
}

impl TierLimits {
    /// Limit that applies to `tier`.
    pub fn for_tier(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Free => self.free,
            Tier::Pro => self.pro,
            Tier::Enterprise => self.enterprise,
        }
    }
}

/// Fixed-window rate limit for a single endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Requests admitted per window when no tier applies.
    #[serde(default = "default_limit")]
    pub limit: u32,

    /// Window length in milliseconds.
    #[serde(default = "default_window_ms", alias = "windowMs")]
    pub window_ms: u64,

    /// Optional tier-specific limits. Takes precedence over `limit` when
    /// the caller supplies a tier.
    #[serde(default, alias = "tierLimits")]
    pub tier_limits: Option<TierLimits>,
}

fn default_limit() -> u32 {
    60
}
fn default_window_ms() -> u64 {
    60_000
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            window_ms: default_window_ms(),
            tier_limits: None,
        }
    }
}

impl RateLimitSettings {
    /// Convenience constructor without tier scaling.
    pub fn new(limit: u32, window_ms: u64) -> Self {
        Self {
            limit,
            window_ms,
            tier_limits: None,
        }
    }

    /// Effective limit for an optional caller tier.
    pub fn limit_for(&self, tier: Option<Tier>) -> u32 {
        match (tier, self.tier_limits) {
            (Some(tier), Some(limits)) => limits.for_tier(tier),
            _ => self.limit,
        }
    }

    /// Window length as a [`Duration`].
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

// ── Circuit breaking ─────────────────────────────────────────────────────

/// Thresholds for one circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSettings {
    /// Consecutive failures in CLOSED that open the circuit.
    #[serde(default = "default_failure_threshold", alias = "failureThreshold")]
    pub failure_threshold: u32,

    /// Milliseconds an OPEN circuit waits before admitting a probe.
    #[serde(default = "default_reset_timeout_ms", alias = "resetTimeoutMs", alias = "resetTimeout")]
    pub reset_timeout_ms: u64,

    /// Consecutive HALF_OPEN successes that close the circuit.
    #[serde(default = "default_success_threshold", alias = "successThreshold")]
    pub success_threshold: u32,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_reset_timeout_ms() -> u64 {
    30_000
}
fn default_success_threshold() -> u32 {
    2
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
            success_threshold: default_success_threshold(),
        }
    }
}

impl BreakerSettings {
    /// Reset timeout as a [`Duration`].
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

// ── Retry ────────────────────────────────────────────────────────────────

/// How the delay between retry attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// `initial_delay * 2^attempt`
    #[default]
    Exponential,
    /// `initial_delay * (attempt + 1)`
    Linear,
    /// `initial_delay`
    Fixed,
}

/// Retry behaviour for one call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Retries after the initial attempt.
    #[serde(default = "default_max_retries", alias = "maxRetries")]
    pub max_retries: u32,

    /// Base delay in milliseconds.
    #[serde(default = "default_initial_delay_ms", alias = "initialDelayMs", alias = "initialDelay")]
    pub initial_delay_ms: u64,

    /// Backoff growth strategy.
    #[serde(default)]
    pub strategy: BackoffStrategy,

    /// Per-attempt timeout in milliseconds. `None` disables it.
    #[serde(default, alias = "timeoutMs", alias = "timeout")]
    pub timeout_ms: Option<u64>,

    /// Upper bound on any single delay. `None` leaves delays uncapped.
    #[serde(default, alias = "maxDelayMs")]
    pub max_delay_ms: Option<u64>,
}

fn default_max_retries() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    1_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            strategy: BackoffStrategy::default(),
            timeout_ms: None,
            max_delay_ms: None,
        }
    }
}

impl RetrySettings {
    /// Base delay as a [`Duration`].
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Per-attempt timeout, if configured.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}
