//! REST API for the sluice ingestion layer.
//!
//! Provides the generation endpoint, circuit-breaker inspection and a
//! health check. Rate limits are enforced per route by
//! [`rate_limit::enforce`].

pub mod error;
pub mod handlers;
pub mod rate_limit;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use sluice_core::{RateLimiter, StreamIngestor};
use sluice_llm::BreakerRegistry;

/// Shared state accessible by all API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub ingestor: Arc<StreamIngestor>,
    /// Same limiter the ingestor was built with.
    pub limiter: Arc<RateLimiter>,
    /// Same registry the ingestor opens streams through.
    pub breakers: Arc<BreakerRegistry>,
}

impl ApiState {
    /// State sharing the ingestor's limiter and breaker registry.
    pub fn new(ingestor: StreamIngestor) -> Self {
        Self {
            limiter: ingestor.limiter().clone(),
            breakers: ingestor.breakers().clone(),
            ingestor: Arc::new(ingestor),
        }
    }
}

/// Build the API router with all routes.
///
/// An empty `cors_origins` allows any origin.
pub fn build_router(state: ApiState, cors_origins: &[String]) -> Router {
    let cors = if cors_origins.is_empty() {
        CorsLayer::permissive()
    } else {
        let origins: Vec<_> = cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        .nest("/api", handlers::api_routes(&state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
