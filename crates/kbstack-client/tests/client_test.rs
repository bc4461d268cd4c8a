// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! ServiceClient tests against a stub HTTP server.

use std::time::{Duration, Instant};

use kbstack_client::{
    BreakerConfig, CircuitState, ClientConfig, ClientError, RetryPolicy, ServiceClient,
    ServiceState,
};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(20),
        multiplier: 2.0,
    }
}

fn client_for(server: &MockServer) -> ServiceClient {
    let config = ClientConfig::new()
        .with_base_url(&server.uri())
        .unwrap()
        .with_retry(fast_retry())
        .with_request_timeout(Duration::from_secs(2));
    ServiceClient::new(config).unwrap()
}

// ============================================================================
// Health probes
// ============================================================================

#[tokio::test]
async fn test_probe_health_ready() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"status": "ready", "version": "0.5.1"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let health = client_for(&server).probe_health().await.unwrap();
    assert_eq!(health.status, ServiceState::Ready);
    assert_eq!(health.version, "0.5.1");
}

#[tokio::test]
async fn test_probe_health_non_2xx_is_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let err = client_for(&server).probe_health().await.unwrap_err();
    assert!(matches!(err, ClientError::Status { status: 503, .. }));
}

#[tokio::test]
async fn test_health_check_retries_until_answer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "degraded"})))
        .with_priority(2)
        .mount(&server)
        .await;

    let health = client_for(&server).health_check().await.unwrap();
    assert_eq!(health.status, ServiceState::Degraded);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

// ============================================================================
// Resilient calls
// ============================================================================

#[tokio::test]
async fn test_get_json_is_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/datasets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["papers", "notes"])))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let first = client.get_json("api/v1/datasets").await.unwrap();
    let second = client.get_json("/api/v1/datasets").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first, json!(["papers", "notes"]));
}

#[tokio::test]
async fn test_post_json_sends_bearer_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/search"))
        .and(header("Authorization", "Bearer kb-token"))
        .and(body_json(json!({"query": "rust"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
        .expect(1)
        .mount(&server)
        .await;

    let config = ClientConfig::new()
        .with_base_url(&server.uri())
        .unwrap()
        .with_api_key("kb-token");
    let client = ServiceClient::new(config).unwrap();

    let result = client
        .post_json("api/v1/search", &json!({"query": "rust"}))
        .await
        .unwrap();
    assert_eq!(result, json!({"results": []}));
}

#[tokio::test]
async fn test_client_error_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/search"))
        .respond_with(ResponseTemplate::new(422))
        .expect(1)
        .mount(&server)
        .await;

    let err = client_for(&server)
        .post_json("api/v1/search", &json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Status { status: 422, .. }));
}

#[tokio::test]
async fn test_breaker_opens_and_rejects() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/add"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let config = ClientConfig::new()
        .with_base_url(&server.uri())
        .unwrap()
        .with_retry(RetryPolicy::none())
        .with_breaker(BreakerConfig {
            failure_threshold: 2,
            cool_down: Duration::from_secs(60),
            probe_successes: 1,
        });
    let client = ServiceClient::new(config).unwrap();

    for _ in 0..2 {
        let err = client.post_json("api/v1/add", &json!({})).await.unwrap_err();
        assert!(matches!(err, ClientError::Status { status: 500, .. }));
    }
    assert_eq!(client.circuit_state().await, CircuitState::Open);

    let err = client.post_json("api/v1/add", &json!({})).await.unwrap_err();
    assert!(matches!(err, ClientError::CircuitOpen { .. }));
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_half_open_batch_sends_one_trial() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/add"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/add"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"ok": true}))
                .set_delay(Duration::from_millis(100)),
        )
        .with_priority(2)
        .mount(&server)
        .await;

    let config = ClientConfig::new()
        .with_base_url(&server.uri())
        .unwrap()
        .with_retry(RetryPolicy::none())
        .with_max_concurrency(5)
        .with_breaker(BreakerConfig {
            failure_threshold: 2,
            cool_down: Duration::from_millis(50),
            probe_successes: 1,
        });
    let client = ServiceClient::new(config).unwrap();

    for _ in 0..2 {
        client.post_json("api/v1/add", &json!({})).await.unwrap_err();
    }
    assert_eq!(client.circuit_state().await, CircuitState::Open);
    tokio::time::sleep(Duration::from_millis(80)).await;

    let bodies = (0..5).map(|i| json!({"doc": i})).collect();
    let results = client.post_batch("api/v1/add", bodies).await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(ClientError::CircuitOpen { .. })))
            .count(),
        4
    );
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
    assert_eq!(client.circuit_state().await, CircuitState::Closed);
}

#[tokio::test]
async fn test_batch_respects_concurrency_cap() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/add"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"ok": true}))
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&server)
        .await;

    let config = ClientConfig::new()
        .with_base_url(&server.uri())
        .unwrap()
        .with_max_concurrency(5);
    let client = ServiceClient::new(config).unwrap();

    let bodies = (0..10).map(|i| json!({"doc": i})).collect();
    let started = Instant::now();
    let results = client.post_batch("api/v1/add", bodies).await;

    assert_eq!(results.len(), 10);
    assert!(results.iter().all(|r| r.is_ok()));
    // 10 requests, 5 at a time, 200ms each: at least two waves
    assert!(started.elapsed() >= Duration::from_millis(380));
}
