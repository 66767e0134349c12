//! Fixed-window rate limiter keyed by endpoint and caller.
//!
//! Each `(endpoint, identifier)` pair owns one [`RateWindow`]. The first
//! request in a window starts it; requests past the endpoint's limit are
//! rejected until `window_start + window` has passed.
//!
//! Thread-safe via `DashMap`: the read-check-increment for one key runs
//! under that key's shard lock, so concurrent requests for the same key
//! can never both be admitted past the limit.
//!
//! # Memory bound
//!
//! Windows idle for longer than the retention period (default 1 hour) are
//! evicted by [`RateLimiter::sweep`], which
//! [`RateLimiter::spawn_sweeper`] runs on an interval (default 5 minutes).

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sluice_types::config::presets::{self, DEFAULT_PRESET};
use sluice_types::config::{RateLimitSettings, Tier};

/// Default idle time after which a window is evicted.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);

/// Default interval between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RESET: &str = "x-ratelimit-reset";
pub const HEADER_RETRY_AFTER: &str = "retry-after";

// ── RateWindow ───────────────────────────────────────────────────────────

/// Counter for one `(endpoint, identifier)` pair.
#[derive(Debug, Clone, Copy)]
pub struct RateWindow {
    pub count: u32,
    pub window_start: Instant,
    pub last_seen: Instant,
}

// ── Decision ─────────────────────────────────────────────────────────────

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Wall-clock end of the current window.
    pub reset_at: DateTime<Utc>,
    /// Whole seconds until the window ends, set only on rejection.
    pub retry_after_secs: Option<u64>,
}

impl RateLimitDecision {
    /// Quota headers for a response. `retry-after` only on rejection.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            (HEADER_LIMIT, self.limit.to_string()),
            (HEADER_REMAINING, self.remaining.to_string()),
            (HEADER_RESET, self.reset_at.timestamp().to_string()),
        ];
        if let (false, Some(secs)) = (self.allowed, self.retry_after_secs) {
            headers.push((HEADER_RETRY_AFTER, secs.to_string()));
        }
        headers
    }
}

/// Result of [`RateLimiter::with_rate_limit`].
#[derive(Debug)]
pub enum RateLimitOutcome<T> {
    /// The handler ran; `decision` carries the remaining quota.
    Allowed { value: T, decision: RateLimitDecision },
    /// The handler did not run.
    Rejected { decision: RateLimitDecision },
}

impl<T> RateLimitOutcome<T> {
    pub fn decision(&self) -> &RateLimitDecision {
        match self {
            Self::Allowed { decision, .. } | Self::Rejected { decision } => decision,
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

// ── RateLimiter ──────────────────────────────────────────────────────────

/// Process-wide fixed-window limiter.
#[derive(Debug)]
pub struct RateLimiter {
    /// Keyed by `(endpoint, identifier)`.
    windows: DashMap<(String, String), RateWindow>,
    presets: HashMap<String, RateLimitSettings>,
    retention: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    /// Limiter using the built-in endpoint presets.
    pub fn new() -> Self {
        Self::with_presets(presets::builtin_rate_limits())
    }

    /// Limiter with caller-supplied presets (e.g. `Config::resolved_rate_limits`).
    pub fn with_presets(presets: HashMap<String, RateLimitSettings>) -> Self {
        Self {
            windows: DashMap::new(),
            presets,
            retention: DEFAULT_RETENTION,
        }
    }

    /// Builder method to override the idle retention period.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Settings for `endpoint`, falling back to the `default` preset.
    pub fn settings_for(&self, endpoint: &str) -> RateLimitSettings {
        self.presets
            .get(endpoint)
            .or_else(|| self.presets.get(DEFAULT_PRESET))
            .cloned()
            .unwrap_or_default()
    }

    /// Check and count one request using the endpoint's preset.
    pub fn check(&self, endpoint: &str, identifier: &str, tier: Option<Tier>) -> RateLimitDecision {
        let settings = self.settings_for(endpoint);
        self.check_with(endpoint, identifier, tier, &settings)
    }

    /// Check and count one request with call-site settings.
    pub fn check_with(
        &self,
        endpoint: &str,
        identifier: &str,
        tier: Option<Tier>,
        settings: &RateLimitSettings,
    ) -> RateLimitDecision {
        self.check_at(endpoint, identifier, tier, settings, Instant::now(), Utc::now())
    }

    /// [`check_with`](Self::check_with) with explicit clock readings.
    ///
    /// `now` drives window arithmetic; `wall_now` only anchors `reset_at`.
    pub fn check_at(
        &self,
        endpoint: &str,
        identifier: &str,
        tier: Option<Tier>,
        settings: &RateLimitSettings,
        now: Instant,
        wall_now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let limit = settings.limit_for(tier);
        let window = settings.window();

        let mut entry = self
            .windows
            .entry(window_key(endpoint, identifier))
            .or_insert(RateWindow {
                count: 0,
                window_start: now,
                last_seen: now,
            });

        if now.saturating_duration_since(entry.window_start) >= window {
            entry.count = 0;
            entry.window_start = now;
        }
        entry.last_seen = now;

        let elapsed = now.saturating_duration_since(entry.window_start);
        let until_reset = window.saturating_sub(elapsed);
        let reset_at = wall_now
            + chrono::Duration::from_std(until_reset).unwrap_or_else(|_| chrono::Duration::zero());

        if entry.count < limit {
            entry.count += 1;
            RateLimitDecision {
                allowed: true,
                limit,
                remaining: limit - entry.count,
                reset_at,
                retry_after_secs: None,
            }
        } else {
            let retry_after_secs = ceil_secs(until_reset).max(1);
            debug!(
                endpoint,
                identifier,
                limit,
                retry_after_secs,
                "rate limit exceeded"
            );
            RateLimitDecision {
                allowed: false,
                limit,
                remaining: 0,
                reset_at,
                retry_after_secs: Some(retry_after_secs),
            }
        }
    }

    /// Run `handler` only if the request is admitted.
    pub async fn with_rate_limit<T, F, Fut>(
        &self,
        endpoint: &str,
        identifier: &str,
        tier: Option<Tier>,
        handler: F,
    ) -> RateLimitOutcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let decision = self.check(endpoint, identifier, tier);
        if !decision.allowed {
            return RateLimitOutcome::Rejected { decision };
        }
        let value = handler().await;
        RateLimitOutcome::Allowed { value, decision }
    }

    /// Drop the window for one pair. Returns `true` if one existed.
    pub fn reset(&self, endpoint: &str, identifier: &str) -> bool {
        self.windows.remove(&window_key(endpoint, identifier)).is_some()
    }

    pub fn clear(&self) {
        self.windows.clear();
    }

    /// Number of windows currently held.
    pub fn tracked_windows(&self) -> usize {
        self.windows.len()
    }

    /// Evict windows idle longer than the retention period. Returns the
    /// number evicted.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let before = self.windows.len();
        let retention = self.retention;
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.last_seen) < retention);
        let evicted = before.saturating_sub(self.windows.len());
        if evicted > 0 {
            info!(evicted, remaining = self.windows.len(), "rate limit sweep");
        }
        evicted
    }

    /// Sweep every `interval` until `cancel` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("rate limit sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        limiter.sweep();
                    }
                }
            }
        })
    }
}

fn window_key(endpoint: &str, identifier: &str) -> (String, String) {
    (endpoint.to_string(), identifier.to_string())
}

fn ceil_secs(d: Duration) -> u64 {
    let ms = d.as_millis() as u64;
    ms.div_ceil(1000)
}

/// Log a rejection at the request boundary.
pub fn log_rejection(endpoint: &str, identifier: &str, decision: &RateLimitDecision) {
    warn!(
        endpoint,
        identifier,
        limit = decision.limit,
        retry_after_secs = decision.retry_after_secs.unwrap_or_default(),
        "request rejected by rate limiter"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_types::config::TierLimits;

    fn five_per_minute() -> RateLimitSettings {
        RateLimitSettings::new(5, 60_000)
    }

    // --- Test 1: sixth call in the window is rejected ---
    #[test]
    fn sixth_call_rejected() {
        let limiter = RateLimiter::new();
        let s = five_per_minute();
        let t0 = Instant::now();
        let wall = Utc::now();

        for i in 0..5 {
            let d = limiter.check_at("chat", "u1", None, &s, t0, wall);
            assert!(d.allowed, "call {i} should be allowed");
            assert_eq!(d.remaining, 4 - i);
        }
        let d = limiter.check_at("chat", "u1", None, &s, t0 + Duration::from_secs(10), wall);
        assert!(!d.allowed);
        assert_eq!(d.remaining, 0);
        assert_eq!(d.retry_after_secs, Some(50));
    }

    // --- Test 2: retry-after rounds up ---
    #[test]
    fn retry_after_is_ceiling() {
        let limiter = RateLimiter::new();
        let s = RateLimitSettings::new(1, 60_000);
        let t0 = Instant::now();
        let wall = Utc::now();
        limiter.check_at("e", "u", None, &s, t0, wall);
        let d = limiter.check_at("e", "u", None, &s, t0 + Duration::from_millis(58_500), wall);
        assert_eq!(d.retry_after_secs, Some(2));
    }

    // --- Test 3: a fresh window admits again ---
    #[test]
    fn fresh_window_allows() {
        let limiter = RateLimiter::new();
        let s = five_per_minute();
        let t0 = Instant::now();
        let wall = Utc::now();
        for _ in 0..6 {
            limiter.check_at("chat", "u1", None, &s, t0, wall);
        }
        let d = limiter.check_at("chat", "u1", None, &s, t0 + Duration::from_secs(60), wall);
        assert!(d.allowed);
        assert_eq!(d.remaining, 4);
    }

    // --- Test 4: identifiers and endpoints are independent ---
    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new();
        let s = RateLimitSettings::new(1, 60_000);
        let t0 = Instant::now();
        let wall = Utc::now();
        assert!(limiter.check_at("chat", "a", None, &s, t0, wall).allowed);
        assert!(!limiter.check_at("chat", "a", None, &s, t0, wall).allowed);
        assert!(limiter.check_at("chat", "b", None, &s, t0, wall).allowed);
        assert!(limiter.check_at("listing", "a", None, &s, t0, wall).allowed);
        assert_eq!(limiter.tracked_windows(), 3);

        // Separator characters in either half never merge two pairs.
        assert!(limiter.check_at("a:b", "c", None, &s, t0, wall).allowed);
        assert!(limiter.check_at("a", "b:c", None, &s, t0, wall).allowed);
        assert_eq!(limiter.tracked_windows(), 5);
        assert!(limiter.reset("a", "b:c"));
        assert!(!limiter.check_at("a:b", "c", None, &s, t0, wall).allowed);
    }

    // --- Test 5: tier scales the limit ---
    #[test]
    fn tier_scaling() {
        let limiter = RateLimiter::new();
        let s = RateLimitSettings {
            limit: 1,
            window_ms: 60_000,
            tier_limits: Some(TierLimits {
                free: 1,
                pro: 3,
                enterprise: 10,
            }),
        };
        let t0 = Instant::now();
        let wall = Utc::now();
        let allowed = (0..5)
            .filter(|_| limiter.check_at("gen", "p", Some(Tier::Pro), &s, t0, wall).allowed)
            .count();
        assert_eq!(allowed, 3);
    }

    // --- Test 6: endpoint presets differ ---
    #[test]
    fn presets_by_endpoint() {
        let limiter = RateLimiter::new();
        assert_eq!(limiter.settings_for("chat").limit, 20);
        assert_eq!(limiter.settings_for("listing").limit, 120);
        assert_eq!(limiter.settings_for("unknown").limit, 60);
        let d = limiter.check("chat", "x", Some(Tier::Enterprise));
        assert_eq!(d.limit, 500);
    }

    // --- Test 7: reset_at is the end of the window ---
    #[test]
    fn reset_at_tracks_window_end() {
        let limiter = RateLimiter::new();
        let s = five_per_minute();
        let t0 = Instant::now();
        let wall = Utc::now();
        limiter.check_at("e", "u", None, &s, t0, wall);
        let later_wall = wall + chrono::Duration::seconds(20);
        let d = limiter.check_at("e", "u", None, &s, t0 + Duration::from_secs(20), later_wall);
        assert_eq!(d.reset_at, wall + chrono::Duration::seconds(60));
    }

    // --- Test 8: headers ---
    #[test]
    fn headers_include_retry_after_only_on_reject() {
        let limiter = RateLimiter::new();
        let s = RateLimitSettings::new(1, 60_000);
        let t0 = Instant::now();
        let wall = Utc::now();

        let ok = limiter.check_at("e", "u", None, &s, t0, wall);
        let names: Vec<_> = ok.headers().iter().map(|(k, _)| *k).collect();
        assert_eq!(names, vec![HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET]);

        let rejected = limiter.check_at("e", "u", None, &s, t0, wall);
        let headers = rejected.headers();
        assert_eq!(headers.len(), 4);
        assert_eq!(headers[3], (HEADER_RETRY_AFTER, "60".to_string()));
        assert_eq!(headers[2].1, rejected.reset_at.timestamp().to_string());
    }

    // --- Test 9: sweep evicts idle windows only ---
    #[test]
    fn sweep_evicts_idle_windows() {
        let limiter = RateLimiter::new().with_retention(Duration::from_secs(3600));
        let s = five_per_minute();
        let t0 = Instant::now();
        let wall = Utc::now();
        limiter.check_at("e", "old", None, &s, t0, wall);
        limiter.check_at("e", "new", None, &s, t0 + Duration::from_secs(3000), wall);

        assert_eq!(limiter.sweep_at(t0 + Duration::from_secs(3700)), 1);
        assert_eq!(limiter.tracked_windows(), 1);
        assert!(limiter.reset("e", "new"));
        assert_eq!(limiter.tracked_windows(), 0);
    }

    // --- Test 10: concurrent checks never over-admit ---
    #[test]
    fn concurrent_checks_are_exact() {
        let limiter = Arc::new(RateLimiter::new());
        let s = RateLimitSettings::new(100, 60_000);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                let s = s.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .filter(|_| limiter.check_with("hot", "same", None, &s).allowed)
                        .count()
                })
            })
            .collect();
        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 100);
    }

    // --- Test 11: wrapper runs the handler only when admitted ---
    #[tokio::test]
    async fn with_rate_limit_wraps_handler() {
        let mut presets = HashMap::new();
        presets.insert("tiny".to_string(), RateLimitSettings::new(1, 60_000));
        let limiter = RateLimiter::with_presets(presets);

        let first = limiter.with_rate_limit("tiny", "u", None, || async { 42 }).await;
        assert!(first.is_allowed());
        assert_eq!(first.decision().remaining, 0);
        assert!(matches!(first, RateLimitOutcome::Allowed { value: 42, .. }));

        let mut ran = false;
        let second = limiter
            .with_rate_limit("tiny", "u", None, || async {
                ran = true;
            })
            .await;
        assert!(!second.is_allowed());
        assert!(second.decision().retry_after_secs.is_some());
        assert!(!ran);
    }

    // --- Test 12: sweeper task stops on cancel ---
    #[tokio::test]
    async fn sweeper_stops_on_cancel() {
        let limiter = Arc::new(RateLimiter::new().with_retention(Duration::ZERO));
        limiter.check("e", "u", None);
        let cancel = CancellationToken::new();
        let handle = limiter.spawn_sweeper(Duration::from_millis(10), cancel.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(limiter.tracked_windows(), 0);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
