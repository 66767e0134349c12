//! Resilient outbound calls for sluice.
//!
//! This crate wraps calls to external dependencies, primarily the
//! generative content provider, with retry and circuit-breaking
//! discipline, and provides the HTTP transport that turns a provider
//! response into a stream of text chunks.
//!
//! # Architecture
//!
//! - [`StreamProvider`] trait: "open a generation stream" as an opaque async call
//! - [`HttpStreamProvider`] implements it over plain chunked HTTP
//! - [`RetryPolicy`] re-issues transient failures with backoff
//! - [`BreakerRegistry`] / [`CircuitBreaker`] short-circuit failing dependencies
//!
//! The intended composition is retry outside, breaker inside, with the
//! per-attempt timeout enforced by the breaker so hung calls are counted:
//!
//! ```rust,ignore
//! let breaker = registry.breaker(provider.name());
//! let stream = retry
//!     .execute_guarded(&breaker, || provider.open_stream(&request))
//!     .await?;
//! ```

pub mod circuit_breaker;
pub mod decode;
pub mod error;
pub mod http;
pub mod provider;
pub mod retry;

pub use circuit_breaker::{BreakerRegistry, CircuitBreaker, CircuitSnapshot, CircuitState};
pub use decode::Utf8ChunkDecoder;
pub use error::{ProviderError, Result};
pub use http::HttpStreamProvider;
pub use provider::{GenerationRequest, StreamProvider, TextStream};
pub use retry::{RetryPolicy, compute_delay, is_retryable, retry_with_backoff};
