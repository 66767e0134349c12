//! Mock HTTP server tests for `HttpStreamProvider` and the retry/breaker
//! composition around it.
//!
//! Uses [`wiremock`] to stand up a local HTTP server that emulates a
//! streaming generation endpoint.
//!
//! Coverage:
//! - Successful stream, body delivered intact
//! - 429 with Retry-After header
//! - 4xx / 5xx status mapping
//! - Bearer token and custom headers forwarded
//! - Retry recovers from transient 503s
//! - Breaker opens after repeated 500s and stops hitting the server
//! - Slow responses time out inside the breaker and open it

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sluice_llm::{
    BreakerRegistry, CircuitState, GenerationRequest, HttpStreamProvider, ProviderError,
    RetryPolicy, StreamProvider,
};
use sluice_types::config::{BackoffStrategy, BreakerSettings, ProviderEndpointConfig, RetrySettings};

fn mock_config(server_url: &str) -> ProviderEndpointConfig {
    ProviderEndpointConfig {
        name: "mock-provider".into(),
        url: Some(format!("{server_url}/generate")),
        ..Default::default()
    }
}

fn test_request() -> GenerationRequest {
    GenerationRequest::new(serde_json::json!({"brief": "spring launch"}))
}

fn fast_retry(max_retries: u32) -> RetrySettings {
    RetrySettings {
        max_retries,
        initial_delay_ms: 1,
        strategy: BackoffStrategy::Fixed,
        timeout_ms: None,
        max_delay_ms: None,
    }
}

async fn collect(provider: &dyn StreamProvider) -> sluice_llm::Result<String> {
    let mut stream = provider.open_stream(&test_request()).await?;
    let mut out = String::new();
    while let Some(chunk) = stream.next().await {
        out.push_str(&chunk?);
    }
    Ok(out)
}

// ── Success ────────────────────────────────────────────────────────────

#[tokio::test]
async fn stream_success_delivers_body() {
    let server = MockServer::start().await;
    let body = "[STATUS:thinking]HERO:\nHéllo 🦀\n---\nBODY:\nWorld";

    Mock::given(method("POST"))
        .and(path("/generate"))
        .and(body_json(serde_json::json!({"brief": "spring launch"})))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(1)
        .mount(&server)
        .await;

    let provider = HttpStreamProvider::new(mock_config(&server.uri())).unwrap();
    let text = collect(&provider).await.unwrap();
    assert_eq!(text, body);
}

#[tokio::test]
async fn empty_body_yields_empty_stream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let provider = HttpStreamProvider::new(mock_config(&server.uri())).unwrap();
    assert_eq!(collect(&provider).await.unwrap(), "");
}

// ── Status mapping ─────────────────────────────────────────────────────

#[tokio::test]
async fn rate_limited_uses_retry_after_header() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "2"))
        .mount(&server)
        .await;

    let provider = HttpStreamProvider::new(mock_config(&server.uri())).unwrap();
    let err = collect(&provider).await.unwrap_err();
    match err {
        ProviderError::RateLimited { retry_after_ms } => assert_eq!(retry_after_ms, 2000),
        other => panic!("expected RateLimited, got {other:?}"),
    }
}

#[tokio::test]
async fn rate_limited_without_header_defaults() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let provider = HttpStreamProvider::new(mock_config(&server.uri())).unwrap();
    assert!(matches!(
        collect(&provider).await.unwrap_err(),
        ProviderError::RateLimited { retry_after_ms: 1000 }
    ));
}

#[tokio::test]
async fn client_error_maps_to_http_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad brief"))
        .mount(&server)
        .await;

    let provider = HttpStreamProvider::new(mock_config(&server.uri())).unwrap();
    match collect(&provider).await.unwrap_err() {
        ProviderError::Http { status, body } => {
            assert_eq!(status, 400);
            assert_eq!(body, "bad brief");
        }
        other => panic!("expected Http, got {other:?}"),
    }
}

#[tokio::test]
async fn server_error_maps_to_http_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let provider = HttpStreamProvider::new(mock_config(&server.uri())).unwrap();
    let err = collect(&provider).await.unwrap_err();
    assert_eq!(err.status(), Some(502));
}

#[tokio::test]
async fn unreachable_server_is_network_error() {
    // Nothing listens on port 9 on loopback in CI sandboxes.
    let provider = HttpStreamProvider::new(mock_config("http://127.0.0.1:9")).unwrap();
    let err = collect(&provider).await.unwrap_err();
    assert!(sluice_llm::is_retryable(&err), "{err:?}");
}

// ── Headers ────────────────────────────────────────────────────────────

#[tokio::test]
async fn bearer_and_custom_headers_forwarded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("Authorization", "Bearer sk-test"))
        .and(header("X-Workspace", "acme"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = mock_config(&server.uri());
    config.headers = HashMap::from([("X-Workspace".to_string(), "acme".to_string())]);
    let provider = HttpStreamProvider::with_api_key(config, "sk-test".into()).unwrap();
    assert_eq!(collect(&provider).await.unwrap(), "ok");
}

// ── Composition ────────────────────────────────────────────────────────

#[tokio::test]
async fn retry_recovers_from_transient_503() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
        .with_priority(2)
        .mount(&server)
        .await;

    let provider = HttpStreamProvider::new(mock_config(&server.uri())).unwrap();
    let registry = Arc::new(BreakerRegistry::new());
    let breaker = registry.breaker(provider.name());
    let request = test_request();

    let mut stream = RetryPolicy::new(fast_retry(3))
        .execute_guarded(&breaker, || provider.open_stream(&request))
        .await
        .unwrap();

    let mut text = String::new();
    while let Some(chunk) = stream.next().await {
        text.push_str(&chunk.unwrap());
    }
    assert_eq!(text, "recovered");
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn breaker_opens_and_stops_calling_server() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("down"))
        .mount(&server)
        .await;

    let provider = HttpStreamProvider::new(mock_config(&server.uri())).unwrap();
    let registry = Arc::new(BreakerRegistry::new());
    let breaker = registry.breaker_with(
        provider.name(),
        BreakerSettings {
            failure_threshold: 2,
            reset_timeout_ms: 60_000,
            success_threshold: 1,
        },
    );
    let request = test_request();

    let err = RetryPolicy::new(fast_retry(4))
        .execute_guarded(&breaker, || provider.open_stream(&request))
        .await
        .err().expect("expected an error");

    // Two real attempts trip the breaker; the third is rejected locally and
    // circuit-open is not retryable.
    assert!(err.is_circuit_open(), "{err:?}");
    assert_eq!(breaker.state(), CircuitState::Open);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn slow_responses_open_the_breaker() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("late")
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let provider = HttpStreamProvider::new(mock_config(&server.uri())).unwrap();
    let registry = Arc::new(BreakerRegistry::new());
    let breaker = registry.breaker_with(
        provider.name(),
        BreakerSettings {
            failure_threshold: 2,
            reset_timeout_ms: 60_000,
            success_threshold: 1,
        },
    );
    let request = test_request();
    let retry = RetryPolicy::new(RetrySettings {
        timeout_ms: Some(50),
        ..fast_retry(3)
    });

    let err = retry
        .execute_guarded(&breaker, || provider.open_stream(&request))
        .await
        .err().expect("expected an error");

    assert!(err.is_circuit_open(), "{err:?}");
    assert_eq!(breaker.state(), CircuitState::Open);
    let snap = registry.snapshot(provider.name()).unwrap();
    assert_eq!(snap.last_error.as_deref(), Some("request timeout"));
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}
