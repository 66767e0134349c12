//! The core [`StreamProvider`] trait for generative content providers.
//!
//! The ingestion pipeline treats "call the provider" as an opaque async
//! operation: it either yields a stream of decoded text chunks or fails
//! with a [`ProviderError`](crate::error::ProviderError). Prompt
//! construction and provider selection live outside this crate; the
//! request body is passed through as-is.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Text chunks produced by an open provider stream.
///
/// Each item is either a decoded UTF-8 fragment or a mid-stream transport
/// error. Fragment boundaries carry no meaning; markers and sections may
/// be split anywhere.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// An opaque generation request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// JSON body forwarded to the provider unchanged.
    #[serde(default)]
    pub body: serde_json::Value,
}

impl GenerationRequest {
    /// Wrap a JSON body.
    pub fn new(body: serde_json::Value) -> Self {
        Self { body }
    }
}

/// A provider that can open a streaming generation.
///
/// # Example
///
/// ```rust,ignore
/// use futures_util::StreamExt;
/// use sluice_llm::{GenerationRequest, StreamProvider};
///
/// async fn collect(provider: &dyn StreamProvider) -> sluice_llm::Result<String> {
///     let request = GenerationRequest::new(serde_json::json!({"topic": "launch"}));
///     let mut stream = provider.open_stream(&request).await?;
///     let mut out = String::new();
///     while let Some(chunk) = stream.next().await {
///         out.push_str(&chunk?);
///     }
///     Ok(out)
/// }
/// ```
#[async_trait]
pub trait StreamProvider: Send + Sync {
    /// Returns the provider name. Also used as the circuit-breaker key.
    fn name(&self) -> &str;

    /// Issue the request and return the response body as a text stream.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`](crate::error::ProviderError) if the
    /// request cannot be sent or the provider answers with a failure
    /// status. Failures after the stream is open surface as `Err` items.
    async fn open_stream(&self, request: &GenerationRequest) -> Result<TextStream>;
}
