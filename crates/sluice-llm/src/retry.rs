//! Backoff retry logic for provider calls.
//!
//! [`RetryPolicy`] re-issues a failed async operation according to a
//! [`BackoffStrategy`] and the [`is_retryable`] classifier. Transient
//! failures (network, timeout, HTTP 429, HTTP 5xx) are retried; client
//! errors and cancellation propagate unchanged after a single attempt.
//!
//! When every allowed attempt fails, the caller receives
//! [`ProviderError::RetriesExhausted`] carrying the attempt count and the
//! final underlying error.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use sluice_types::config::{BackoffStrategy, RetrySettings};

use crate::circuit_breaker::CircuitBreaker;
use crate::error::{ProviderError, Result};

/// Substrings that mark a free-form failure message as network-class.
const NETWORK_HINTS: &[&str] = &["fetch", "network", "timeout", "econnreset", "econnrefused"];

/// Callback invoked before each retry with the retry number (1-based) and
/// the error that triggered it.
pub type RetryCallback = Arc<dyn Fn(u32, &ProviderError) + Send + Sync>;

/// Determines whether a [`ProviderError`] should be retried.
pub fn is_retryable(err: &ProviderError) -> bool {
    match err {
        ProviderError::Network(_) | ProviderError::Timeout | ProviderError::RateLimited { .. } => {
            true
        }
        ProviderError::Http { status, .. } => *status == 429 || *status >= 500,
        ProviderError::RequestFailed(msg) => {
            let lower = msg.to_ascii_lowercase();
            NETWORK_HINTS.iter().any(|hint| lower.contains(hint))
        }
        ProviderError::Cancelled
        | ProviderError::InvalidResponse(_)
        | ProviderError::NotConfigured(_)
        | ProviderError::CircuitOpen { .. }
        | ProviderError::RetriesExhausted { .. } => false,
    }
}

/// Delay before retry number `attempt + 1` (`attempt` is 0-indexed).
///
/// - exponential: `initial * 2^attempt`
/// - linear: `initial * (attempt + 1)`
/// - fixed: `initial`
///
/// Capped at `max_delay_ms` when set.
pub fn compute_delay(settings: &RetrySettings, attempt: u32) -> Duration {
    let base_ms = settings.initial_delay_ms;
    let raw_ms = match settings.strategy {
        BackoffStrategy::Exponential => base_ms.saturating_mul(2u64.saturating_pow(attempt)),
        BackoffStrategy::Linear => base_ms.saturating_mul(u64::from(attempt) + 1),
        BackoffStrategy::Fixed => base_ms,
    };
    let capped_ms = match settings.max_delay_ms {
        Some(max) => raw_ms.min(max),
        None => raw_ms,
    };
    Duration::from_millis(capped_ms)
}

/// Retries an async operation with backoff.
///
/// # Example
///
/// ```rust,ignore
/// use sluice_llm::retry::RetryPolicy;
/// use sluice_types::RetrySettings;
///
/// let policy = RetryPolicy::new(RetrySettings::default())
///     .with_on_retry(std::sync::Arc::new(|n, err| eprintln!("retry {n}: {err}")));
/// let stream = policy.execute(|| provider.open_stream(&request)).await?;
/// ```
#[derive(Clone)]
pub struct RetryPolicy {
    settings: RetrySettings,
    on_retry: Option<RetryCallback>,
    label: String,
}

impl RetryPolicy {
    pub fn new(settings: RetrySettings) -> Self {
        Self {
            settings,
            on_retry: None,
            label: "call".into(),
        }
    }

    /// Register a callback run after each backoff wait, before the retry.
    pub fn with_on_retry(mut self, callback: RetryCallback) -> Self {
        self.on_retry = Some(callback);
        self
    }

    /// Override the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.settings.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Name used in log lines (typically the dependency name).
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Returns the retry settings.
    pub fn settings(&self) -> &RetrySettings {
        &self.settings
    }

    /// Wait before the retry that follows a failed `attempt`.
    ///
    /// A provider-suggested wait on 429 wins when it is longer.
    fn delay_for(&self, attempt: u32, err: &ProviderError) -> Duration {
        let computed = compute_delay(&self.settings, attempt);
        match err {
            ProviderError::RateLimited { retry_after_ms } => {
                computed.max(Duration::from_millis(*retry_after_ms))
            }
            _ => computed,
        }
    }

    /// Run `op` until it succeeds, fails non-retryably, or attempts run out.
    ///
    /// `op` is invoked at most `max_retries + 1` times. Each invocation is
    /// raced against the per-attempt timeout when one is configured.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(self.settings.timeout(), op).await
    }

    /// Run `op` through `breaker`, retrying as [`execute`](Self::execute)
    /// does.
    ///
    /// The per-attempt timeout is enforced inside the breaker, so a call
    /// that hangs is recorded as a failure and can open the circuit.
    pub async fn execute_guarded<T, F, Fut>(&self, breaker: &CircuitBreaker, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let limit = self.settings.timeout();
        let op = &op;
        self.run(None, move || breaker.execute_within(limit, move || op()))
            .await
    }

    async fn run<T, F, Fut>(&self, attempt_timeout: Option<Duration>, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_retries = self.settings.max_retries;
        let mut attempt: u32 = 0;

        loop {
            let outcome = match attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, op()).await {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Timeout),
                },
                None => op().await,
            };

            let err = match outcome {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(dependency = %self.label, attempt, "call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !is_retryable(&err) {
                return Err(err);
            }

            if attempt >= max_retries {
                warn!(
                    dependency = %self.label,
                    attempts = attempt + 1,
                    error = %err,
                    "retries exhausted"
                );
                return Err(ProviderError::RetriesExhausted {
                    attempts: attempt + 1,
                    source: Box::new(err),
                });
            }

            let delay = self.delay_for(attempt, &err);
            warn!(
                dependency = %self.label,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying after transient error"
            );

            tokio::time::sleep(delay).await;
            attempt += 1;
            if let Some(ref callback) = self.on_retry {
                callback(attempt, &err);
            }
        }
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("settings", &self.settings)
            .field("on_retry", &self.on_retry.as_ref().map(|_| "<callback>"))
            .field("label", &self.label)
            .finish()
    }
}

/// One-shot form of [`RetryPolicy::execute`].
pub async fn retry_with_backoff<T, F, Fut>(op: F, settings: RetrySettings) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    RetryPolicy::new(settings).execute(op).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetrySettings {
        RetrySettings {
            max_retries,
            initial_delay_ms: 1,
            strategy: BackoffStrategy::Fixed,
            timeout_ms: None,
            max_delay_ms: None,
        }
    }

    #[test]
    fn classifier_retryable_cases() {
        assert!(is_retryable(&ProviderError::Timeout));
        assert!(is_retryable(&ProviderError::Network("reset".into())));
        assert!(is_retryable(&ProviderError::RateLimited { retry_after_ms: 10 }));
        for status in [429, 500, 502, 503, 504, 599] {
            assert!(
                is_retryable(&ProviderError::Http {
                    status,
                    body: String::new()
                }),
                "status {status} should retry"
            );
        }
        for msg in ["fetch failed", "Network down", "socket timeout", "ECONNRESET", "econnrefused"] {
            assert!(is_retryable(&ProviderError::RequestFailed(msg.into())), "{msg}");
        }
    }

    #[test]
    fn classifier_non_retryable_cases() {
        for status in [400, 401, 403, 404, 422] {
            assert!(!is_retryable(&ProviderError::Http {
                status,
                body: String::new()
            }));
        }
        assert!(!is_retryable(&ProviderError::Cancelled));
        assert!(!is_retryable(&ProviderError::RequestFailed("bad input".into())));
        assert!(!is_retryable(&ProviderError::CircuitOpen {
            name: "x".into(),
            last_error: None
        }));
        assert!(!is_retryable(&ProviderError::InvalidResponse("x".into())));
    }

    #[test]
    fn delay_strategies() {
        let mut s = RetrySettings {
            initial_delay_ms: 100,
            ..Default::default()
        };
        assert_eq!(compute_delay(&s, 0), Duration::from_millis(100));
        assert_eq!(compute_delay(&s, 3), Duration::from_millis(800));

        s.strategy = BackoffStrategy::Linear;
        assert_eq!(compute_delay(&s, 0), Duration::from_millis(100));
        assert_eq!(compute_delay(&s, 2), Duration::from_millis(300));

        s.strategy = BackoffStrategy::Fixed;
        assert_eq!(compute_delay(&s, 7), Duration::from_millis(100));
    }

    #[test]
    fn delay_respects_cap_and_does_not_overflow() {
        let s = RetrySettings {
            initial_delay_ms: 1000,
            max_delay_ms: Some(5000),
            ..Default::default()
        };
        assert_eq!(compute_delay(&s, 10), Duration::from_millis(5000));
        let uncapped = RetrySettings {
            initial_delay_ms: u64::MAX / 2,
            ..Default::default()
        };
        assert_eq!(compute_delay(&uncapped, 63), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn rate_limited_delay_uses_larger_hint() {
        let policy = RetryPolicy::new(fast(3));
        let err = ProviderError::RateLimited { retry_after_ms: 250 };
        assert_eq!(policy.delay_for(0, &err), Duration::from_millis(250));
        assert_eq!(policy.delay_for(0, &ProviderError::Timeout), Duration::from_millis(1));
    }

    #[tokio::test]
    async fn exhaustion_invokes_initial_plus_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_with_backoff(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::Network("down".into())) }
            },
            fast(2),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result.unwrap_err() {
            ProviderError::RetriesExhausted { attempts, source } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*source, ProviderError::Network(_)));
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_retryable_invokes_once_and_returns_original() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_with_backoff(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(ProviderError::Http {
                        status: 400,
                        body: "bad".into(),
                    })
                }
            },
            fast(5),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result.unwrap_err(),
            ProviderError::Http { status: 400, .. }
        ));
    }

    #[tokio::test]
    async fn non_retryable_after_retries_still_returns_original() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = RetryPolicy::new(fast(5))
            .execute(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(ProviderError::Timeout)
                    } else {
                        Err(ProviderError::Cancelled)
                    }
                }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(result.unwrap_err(), ProviderError::Cancelled));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let value = RetryPolicy::new(fast(3))
            .execute(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ProviderError::Http {
                            status: 503,
                            body: String::new(),
                        })
                    } else {
                        Ok("done")
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(value, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn on_retry_sees_each_retry_number() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let policy = RetryPolicy::new(fast(2)).with_on_retry(Arc::new(move |n, err| {
            sink.lock().unwrap().push((n, err.to_string()));
        }));

        let _ = policy
            .execute(|| async { Err::<(), _>(ProviderError::Timeout) })
            .await;

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![(1, "request timeout".to_string()), (2, "request timeout".to_string())]
        );
    }

    #[tokio::test]
    async fn per_attempt_timeout_is_retryable_and_exhausts() {
        let calls = AtomicU32::new(0);
        let settings = RetrySettings {
            timeout_ms: Some(10),
            ..fast(1)
        };
        let result: Result<()> = RetryPolicy::new(settings)
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let err = result.unwrap_err();
        assert!(err.to_string().contains("request timeout"), "{err}");
    }

    #[tokio::test]
    async fn hung_attempts_open_the_breaker() {
        use crate::circuit_breaker::{BreakerRegistry, CircuitState};
        use sluice_types::config::BreakerSettings;

        let registry = Arc::new(BreakerRegistry::new());
        let breaker = registry.breaker_with(
            "hangs",
            BreakerSettings {
                failure_threshold: 2,
                reset_timeout_ms: 60_000,
                success_threshold: 1,
            },
        );
        let settings = RetrySettings {
            timeout_ms: Some(10),
            ..fast(3)
        };
        let calls = AtomicU32::new(0);

        let result: Result<()> = RetryPolicy::new(settings)
            .execute_guarded(&breaker, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                }
            })
            .await;

        // Two timeouts trip the breaker; the third attempt is refused locally.
        assert!(result.unwrap_err().is_circuit_open());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(breaker.state(), CircuitState::Open);
        let snap = registry.snapshot("hangs").unwrap();
        assert_eq!(snap.consecutive_failures, 2);
        assert_eq!(snap.last_error.as_deref(), Some("request timeout"));
    }

    #[tokio::test]
    async fn zero_retries_still_wraps_retryable_failure() {
        let result: Result<()> = retry_with_backoff(
            || async { Err(ProviderError::Timeout) },
            fast(0),
        )
        .await;
        assert!(matches!(
            result.unwrap_err(),
            ProviderError::RetriesExhausted { attempts: 1, .. }
        ));
    }
}
