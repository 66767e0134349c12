//! Per-route rate-limit middleware.
//!
//! Callers are identified by the `x-client-id` header (`anonymous` when
//! absent) and classified by `x-client-tier`. Every response carries the
//! quota headers; rejected requests get `429` plus `retry-after` and never
//! reach the handler.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;

use sluice_core::rate_limiter::log_rejection;
use sluice_core::{RateLimitDecision, RateLimiter};
use sluice_types::Tier;

/// Header naming the caller.
pub const CLIENT_ID_HEADER: &str = "x-client-id";

/// Header carrying the caller's tier (`free`, `pro`, `enterprise`).
pub const CLIENT_TIER_HEADER: &str = "x-client-tier";

/// Identifier used when no client id is sent.
pub const ANONYMOUS: &str = "anonymous";

/// Limiter plus the preset a route is counted under.
#[derive(Clone)]
pub struct RouteLimit {
    limiter: Arc<RateLimiter>,
    endpoint: &'static str,
}

impl RouteLimit {
    pub fn new(limiter: Arc<RateLimiter>, endpoint: &'static str) -> Self {
        Self { limiter, endpoint }
    }
}

/// Middleware for `axum::middleware::from_fn_with_state`.
pub async fn enforce(State(route): State<RouteLimit>, request: Request, next: Next) -> Response {
    let identifier = header_str(&request, CLIENT_ID_HEADER)
        .filter(|id| !id.is_empty())
        .unwrap_or(ANONYMOUS)
        .to_string();
    let tier = header_str(&request, CLIENT_TIER_HEADER).and_then(Tier::parse);

    let decision = route.limiter.check(route.endpoint, &identifier, tier);
    if !decision.allowed {
        log_rejection(route.endpoint, &identifier, &decision);
        let body = serde_json::json!({
            "error": "rate limit exceeded",
            "endpoint": route.endpoint,
            "retry_after": decision.retry_after_secs,
        });
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        apply_headers(&mut response, &decision);
        return response;
    }

    let mut response = next.run(request).await;
    apply_headers(&mut response, &decision);
    response
}

fn header_str<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
}

fn apply_headers(response: &mut Response, decision: &RateLimitDecision) {
    let headers = response.headers_mut();
    for (name, value) in decision.headers() {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    }
}
