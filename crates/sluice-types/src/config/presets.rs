//! Built-in rate-limit and circuit-breaker presets.
//!
//! Endpoints carry materially different abuse profiles: generation and
//! chat completion are expensive and strict, read-only listings are cheap
//! and generous. User configuration overrides these key by key.

use std::collections::HashMap;

use super::resilience::{BreakerSettings, RateLimitSettings, TierLimits};

/// Key of the preset used when no endpoint- or dependency-specific entry exists.
pub const DEFAULT_PRESET: &str = "default";

/// Logical dependency name for the generative content provider.
pub const LLM_PROVIDER: &str = "llm-provider";

/// Logical dependency name for the persistent store.
pub const PERSISTENCE: &str = "persistence";

/// Returns the built-in rate-limit presets keyed by endpoint.
pub fn builtin_rate_limits() -> HashMap<String, RateLimitSettings> {
    HashMap::from([
        (
            "chat".into(),
            RateLimitSettings {
                limit: 20,
                window_ms: 60_000,
                tier_limits: Some(TierLimits {
                    free: 20,
                    pro: 100,
                    enterprise: 500,
                }),
            },
        ),
        (
            "generate".into(),
            RateLimitSettings {
                limit: 10,
                window_ms: 60_000,
                tier_limits: Some(TierLimits {
                    free: 10,
                    pro: 50,
                    enterprise: 200,
                }),
            },
        ),
        ("listing".into(), RateLimitSettings::new(120, 60_000)),
        (DEFAULT_PRESET.into(), RateLimitSettings::new(60, 60_000)),
    ])
}

/// Returns the built-in circuit-breaker presets keyed by dependency name.
pub fn builtin_breakers() -> HashMap<String, BreakerSettings> {
    HashMap::from([
        (LLM_PROVIDER.into(), BreakerSettings::default()),
        (
            PERSISTENCE.into(),
            BreakerSettings {
                failure_threshold: 3,
                reset_timeout_ms: 10_000,
                success_threshold: 1,
            },
        ),
        (DEFAULT_PRESET.into(), BreakerSettings::default()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Tier;

    #[test]
    fn chat_is_stricter_than_listing() {
        let presets = builtin_rate_limits();
        let chat = &presets["chat"];
        let listing = &presets["listing"];
        assert!(chat.limit < listing.limit);
        assert_eq!(chat.limit_for(Some(Tier::Pro)), 100);
    }

    #[test]
    fn default_presets_exist() {
        assert!(builtin_rate_limits().contains_key(DEFAULT_PRESET));
        assert!(builtin_breakers().contains_key(DEFAULT_PRESET));
    }

    #[test]
    fn persistence_breaker_recovers_faster() {
        let breakers = builtin_breakers();
        assert!(breakers[PERSISTENCE].reset_timeout_ms < breakers[LLM_PROVIDER].reset_timeout_ms);
    }
}
