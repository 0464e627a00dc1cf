//! Integration tests for the HTTP retry client
//!
//! Runs HttpRetryClient over reqwest against MockGatewayServer for:
//! - Retry of 5xx responses with a constant delay
//! - Immediate failure on client errors
//! - Pass-through of 401 and 400
//! - Fail-fast when offline

use std::sync::Arc;
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use reqwest::StatusCode;
use tandem_http_client::{ConnectivityFlag, HttpError, HttpRequest, HttpRetryClient};
use tandem_shared_config::HttpClientConfig;
use tandem_test_utils::MockGatewayServer;

const PROBE_PATH: &str = "/rest/v1/notes";

fn test_config(retry_delay_ms: u64) -> HttpClientConfig {
    HttpClientConfig {
        request_timeout_secs: 2,
        resource_timeout_secs: 5,
        max_retries: 2,
        retry_delay_ms,
    }
}

fn probe_request(server: &MockGatewayServer) -> HttpRequest {
    HttpRequest::get(format!("{}{}", server.url(), PROBE_PATH)).header("apikey", "anon")
}

// ============================================================================
// Retry Behavior
// ============================================================================

/// 503, 503, 200 returns the 200 after three attempts and two delays
#[tokio::test]
async fn test_server_errors_are_retried_until_success() {
    let server = MockGatewayServer::start().await;
    server.mock_status_sequence(PROBE_PATH, &[503, 503, 200]).await;
    let client = HttpRetryClient::new(&test_config(200)).unwrap();

    let start = Instant::now();
    let response = client.perform_request(&probe_request(&server)).await.unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(server.request_count(PROBE_PATH).await, 3);
    assert!(start.elapsed() >= Duration::from_millis(400));
}

/// Persistent 5xx surfaces the last server error after max_retries + 1 attempts
#[tokio::test]
async fn test_server_errors_exhaust_retries() {
    let server = MockGatewayServer::start().await;
    server.mock_status_sequence(PROBE_PATH, &[500]).await;
    let client = HttpRetryClient::new(&test_config(10)).unwrap();

    let result = client.perform_request(&probe_request(&server)).await;

    assert_matches!(result, Err(HttpError::Server { status: 500 }));
    assert_eq!(server.request_count(PROBE_PATH).await, 3);
}

/// 408 is retried like a server error
#[tokio::test]
async fn test_request_timeout_status_is_retried() {
    let server = MockGatewayServer::start().await;
    server.mock_status_sequence(PROBE_PATH, &[408, 200]).await;
    let client = HttpRetryClient::new(&test_config(10)).unwrap();

    let response = client.perform_request(&probe_request(&server)).await.unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(server.request_count(PROBE_PATH).await, 2);
}

/// Explicit retry bound overrides the configured one
#[tokio::test]
async fn test_perform_request_with_custom_bound() {
    let server = MockGatewayServer::start().await;
    server.mock_status_sequence(PROBE_PATH, &[502]).await;
    let client = HttpRetryClient::new(&test_config(1000)).unwrap();

    let result = client
        .perform_request_with(&probe_request(&server), 4, Duration::from_millis(5))
        .await;

    assert_matches!(result, Err(HttpError::Server { status: 502 }));
    assert_eq!(server.request_count(PROBE_PATH).await, 5);
}

// ============================================================================
// Terminal Statuses
// ============================================================================

/// 404 fails after exactly one attempt
#[tokio::test]
async fn test_not_found_fails_immediately() {
    let server = MockGatewayServer::start().await;
    server.mock_status_sequence(PROBE_PATH, &[404, 200]).await;
    let client = HttpRetryClient::new(&test_config(10)).unwrap();

    let result = client.perform_request(&probe_request(&server)).await;

    assert_matches!(result, Err(HttpError::Client { status: 404, .. }));
    assert_eq!(server.request_count(PROBE_PATH).await, 1);
}

/// 401 is returned as a response, not an error, after one attempt
#[tokio::test]
async fn test_unauthorized_passes_through() {
    let server = MockGatewayServer::start().await;
    server.mock_status_sequence(PROBE_PATH, &[401, 200]).await;
    let client = HttpRetryClient::new(&test_config(10)).unwrap();

    let response = client.perform_request(&probe_request(&server)).await.unwrap();

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(server.request_count(PROBE_PATH).await, 1);
}

/// 400 is handed back like 401
#[tokio::test]
async fn test_bad_request_passes_through() {
    let server = MockGatewayServer::start().await;
    server.mock_status_sequence(PROBE_PATH, &[400, 200]).await;
    let client = HttpRetryClient::new(&test_config(10)).unwrap();

    let response = client.perform_request(&probe_request(&server)).await.unwrap();

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(server.request_count(PROBE_PATH).await, 1);
}

// ============================================================================
// Connectivity and Transport
// ============================================================================

/// Offline flag fails the call before any request is sent
#[tokio::test]
async fn test_offline_fails_without_sending() {
    let server = MockGatewayServer::start().await;
    server.mock_status_sequence(PROBE_PATH, &[200]).await;
    let client = HttpRetryClient::new(&test_config(10))
        .unwrap()
        .with_connectivity(Arc::new(ConnectivityFlag::new(false)));

    let result = client.perform_request(&probe_request(&server)).await;

    assert_matches!(result, Err(HttpError::Connectivity));
    assert_eq!(server.request_count(PROBE_PATH).await, 0);
}

/// Each attempt is cut off at the request timeout and retried as a transport timeout
#[tokio::test]
async fn test_slow_attempt_times_out_at_request_timeout() {
    let server = MockGatewayServer::start().await;
    server.mock_delay(PROBE_PATH, 1_500).await;
    let config = HttpClientConfig {
        request_timeout_secs: 1,
        resource_timeout_secs: 5,
        max_retries: 1,
        retry_delay_ms: 10,
    };
    let client = HttpRetryClient::new(&config).unwrap();

    let start = Instant::now();
    let result = client.perform_request(&probe_request(&server)).await;
    let elapsed = start.elapsed();

    match result {
        Err(HttpError::Transport(e)) => {
            assert_eq!(e.kind, tandem_http_client::TransportErrorKind::Timeout)
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    assert!(elapsed < Duration::from_secs(3), "took {:?}", elapsed);
    assert_eq!(server.request_count(PROBE_PATH).await, 2);
}
