//! HTTP streaming provider.
//!
//! [`HttpStreamProvider`] POSTs the request body as JSON to a configured
//! URL and exposes the chunked response body as a [`TextStream`]. The
//! provider emits plain UTF-8 text with in-band markers; no SSE framing
//! is assumed.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;
use tracing::{debug, warn};

use sluice_types::config::ProviderEndpointConfig;

use crate::decode::Utf8ChunkDecoder;
use crate::error::{ProviderError, Result};
use crate::provider::{GenerationRequest, StreamProvider, TextStream};

/// Fallback wait for a 429 that carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER_MS: u64 = 1000;

/// A provider that streams generation output over plain HTTP.
pub struct HttpStreamProvider {
    config: ProviderEndpointConfig,
    http: reqwest::Client,
    api_key: Option<String>,
}

impl HttpStreamProvider {
    /// Create a provider from configuration.
    ///
    /// The bearer token, if any, is resolved from `config.api_key_env` at
    /// request time.
    pub fn new(config: ProviderEndpointConfig) -> Result<Self> {
        let http = build_client(&config)?;
        Ok(Self {
            config,
            http,
            api_key: None,
        })
    }

    /// Create a provider with an explicit bearer token.
    pub fn with_api_key(config: ProviderEndpointConfig, api_key: String) -> Result<Self> {
        let http = build_client(&config)?;
        Ok(Self {
            config,
            http,
            api_key: Some(api_key),
        })
    }

    /// Returns the provider configuration.
    pub fn config(&self) -> &ProviderEndpointConfig {
        &self.config
    }

    fn endpoint(&self) -> Result<&str> {
        self.config
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| ProviderError::NotConfigured(format!("no url for '{}'", self.config.name)))
    }

    /// Explicit key > environment variable > none.
    fn resolve_api_key(&self) -> Option<String> {
        if let Some(ref key) = self.api_key {
            return Some(key.clone());
        }
        self.config
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.is_empty())
    }
}

fn build_client(config: &ProviderEndpointConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(secs) = config.connect_timeout_secs {
        builder = builder.connect_timeout(Duration::from_secs(secs));
    }
    builder
        .build()
        .map_err(|e| ProviderError::NotConfigured(format!("http client: {e}")))
}

#[async_trait]
impl StreamProvider for HttpStreamProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn open_stream(&self, request: &GenerationRequest) -> Result<TextStream> {
        let url = self.endpoint()?;

        debug!(provider = %self.config.name, url = %url, "opening generation stream");

        let mut req = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .header("Accept", "text/plain");

        if let Some(key) = self.resolve_api_key() {
            req = req.header("Authorization", format!("Bearer {key}"));
        }
        for (k, v) in &self.config.headers {
            req = req.header(k.as_str(), v.as_str());
        }

        let response = req.json(&request.body).send().await?;
        let status = response.status();

        if !status.is_success() {
            if status.as_u16() == 429 {
                let retry_ms = parse_retry_after_header(&response).unwrap_or(DEFAULT_RETRY_AFTER_MS);
                let body = response.text().await.unwrap_or_default();
                warn!(
                    provider = %self.config.name,
                    retry_after_ms = retry_ms,
                    body = %body,
                    "rate limited by provider"
                );
                return Err(ProviderError::RateLimited {
                    retry_after_ms: retry_ms,
                });
            }

            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = Box::pin(response.bytes_stream());
        let text = stream::unfold(
            (bytes, Utf8ChunkDecoder::new(), false),
            |(mut bytes, mut decoder, done)| async move {
                if done {
                    return None;
                }
                loop {
                    match bytes.next().await {
                        Some(Ok(chunk)) => {
                            let text = decoder.decode(&chunk);
                            if text.is_empty() {
                                continue;
                            }
                            return Some((Ok(text), (bytes, decoder, false)));
                        }
                        Some(Err(e)) => {
                            let err = ProviderError::Network(format!("stream read error: {e}"));
                            return Some((Err(err), (bytes, decoder, true)));
                        }
                        None => {
                            let tail = decoder.finish();
                            if tail.is_empty() {
                                return None;
                            }
                            return Some((Ok(tail), (bytes, decoder, true)));
                        }
                    }
                }
            },
        );

        Ok(Box::pin(text))
    }
}

/// Numeric `Retry-After` (seconds, possibly fractional) in milliseconds.
fn parse_retry_after_header(response: &reqwest::Response) -> Option<u64> {
    let raw = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())?;
    parse_retry_after_secs(raw)
}

fn parse_retry_after_secs(raw: &str) -> Option<u64> {
    let secs = raw.trim().parse::<f64>().ok()?;
    if !secs.is_finite() {
        return None;
    }
    Some((secs * 1000.0).max(0.0) as u64)
}

impl std::fmt::Debug for HttpStreamProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpStreamProvider")
            .field("name", &self.config.name)
            .field("url", &self.config.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .finish()
    }
}
