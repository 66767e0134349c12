//! Mapping of ingestion failures onto HTTP responses.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::warn;

use sluice_core::IngestError;
use sluice_core::rate_limiter::HEADER_RETRY_AFTER;
use sluice_llm::ProviderError;

/// Status used when the caller went away mid-stream (nginx convention).
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// An [`IngestError`] on its way out of a handler.
#[derive(Debug)]
pub struct ApiError(pub IngestError);

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        Self(err)
    }
}

/// HTTP status for `err`.
pub fn status_for(err: &IngestError) -> StatusCode {
    match err {
        IngestError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        IngestError::Provider(ProviderError::CircuitOpen { .. }) => StatusCode::SERVICE_UNAVAILABLE,
        IngestError::Provider(ProviderError::RetriesExhausted { .. }) => StatusCode::BAD_GATEWAY,
        IngestError::Provider(ProviderError::Http { status, .. }) => {
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
        }
        IngestError::Provider(ProviderError::Cancelled) => {
            StatusCode::from_u16(CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %self.0, "generation failed");
        }
        let body = serde_json::json!({ "error": self.0.to_string() });
        let mut response = (status, Json(body)).into_response();
        if let IngestError::RateLimited {
            retry_after_secs, ..
        } = self.0
        {
            response
                .headers_mut()
                .insert(HEADER_RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}
