//! HTTP request handlers for the REST API.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use sluice_core::{IngestOutcome, IngestRequest};
use sluice_llm::{CircuitSnapshot, GenerationRequest};
use sluice_types::StreamEvent;

use super::ApiState;
use super::error::ApiError;
use super::rate_limit::{RouteLimit, enforce};

/// Rate-limit preset for generation requests.
pub const GENERATE_ENDPOINT: &str = "generate";

/// Rate-limit preset for read-only listings.
pub const LISTING_ENDPOINT: &str = "listing";

/// Build all API routes.
pub fn api_routes(state: &ApiState) -> Router<ApiState> {
    let listing = from_fn_with_state(
        RouteLimit::new(state.limiter.clone(), LISTING_ENDPOINT),
        enforce,
    );
    let generation = from_fn_with_state(
        RouteLimit::new(state.limiter.clone(), GENERATE_ENDPOINT),
        enforce,
    );

    Router::new()
        .route("/health", get(health_check))
        .route("/breakers", get(list_breakers).layer(listing.clone()))
        .route("/breakers/{name}/reset", post(reset_breaker).layer(listing))
        .route("/generate", post(generate).layer(generation))
}

/// Server start time, set once at process start.
static START_TIME: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();

/// Returns basic health status, version, and uptime.
async fn health_check() -> Json<serde_json::Value> {
    let start = START_TIME.get_or_init(std::time::Instant::now);
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": start.elapsed().as_secs()
    }))
}

async fn list_breakers(State(state): State<ApiState>) -> Json<Vec<CircuitSnapshot>> {
    Json(state.breakers.snapshots())
}

async fn reset_breaker(State(state): State<ApiState>, Path(name): Path<String>) -> StatusCode {
    if state.breakers.reset(&name) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

/// Body of `POST /api/generate`.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateRequest {
    /// Forwarded to the provider unchanged.
    #[serde(default)]
    pub body: serde_json::Value,
    #[serde(default, alias = "streamId")]
    pub stream_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateResponse {
    #[serde(flatten)]
    pub outcome: IngestOutcome,
    /// Status markers seen during the stream, in order.
    pub statuses: Vec<String>,
}

/// Run one generation to completion and return the assembled result.
///
/// The request is already counted by the route's rate limiter, so the
/// ingestor is not asked to check it again. A client that disconnects
/// drops this future, which stops the stream without touching the
/// provider's circuit.
async fn generate(
    State(state): State<ApiState>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let mut ingest = IngestRequest::new(GenerationRequest::new(req.body));
    if let Some(id) = req.stream_id.filter(|id| !id.is_empty()) {
        ingest = ingest.with_stream_id(id);
    }

    let (tx, mut rx) = mpsc::channel(64);
    let statuses = tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            if let StreamEvent::Status { status } = event {
                seen.push(status);
            }
        }
        seen
    });

    let outcome = state
        .ingestor
        .ingest(ingest, tx, CancellationToken::new())
        .await?;
    let statuses = statuses.await.unwrap_or_default();

    Ok(Json(GenerateResponse { outcome, statuses }))
}
