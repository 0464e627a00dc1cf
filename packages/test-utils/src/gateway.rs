//! Mock gateway REST and auth endpoints
//!
//! Provides a [`MockGatewayServer`] that simulates the token refresh
//! endpoint and the table REST endpoint for testing the HTTP client without
//! a real gateway.

use serde_json::{json, Value};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

/// Path of the token endpoint
pub const TOKEN_PATH: &str = "/auth/v1/token";

/// Mock gateway server for testing HTTP retry and session refresh
///
/// This struct wraps a [`wiremock::MockServer`] and provides convenience
/// methods for setting up the gateway responses the sync path relies on.
///
/// Mocks are matched in the order they are mounted, and a mock limited with
/// `up_to_n_times` falls through to the next one once used up. The status
/// sequence helpers rely on that.
///
/// # Example
///
/// ```rust,ignore
/// use tandem_test_utils::MockGatewayServer;
///
/// #[tokio::test]
/// async fn test_refresh() {
///     let server = MockGatewayServer::start().await;
///     server.mock_token_refresh_success("new-access", "new-refresh", 3600).await;
///
///     // Configure GatewayConfig with server.url()
/// }
/// ```
pub struct MockGatewayServer {
    server: MockServer,
}

impl MockGatewayServer {
    /// Start a new mock gateway server
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Get the server URL
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Access the underlying server for custom mocks
    pub fn server(&self) -> &MockServer {
        &self.server
    }

    /// REST path of a table
    pub fn table_path(table: &str) -> String {
        format!("/rest/v1/{}", table)
    }

    /// Mount a successful refresh-token exchange
    pub async fn mock_token_refresh_success(
        &self,
        access_token: &str,
        refresh_token: &str,
        expires_in: i64,
    ) {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(query_param("grant_type", "refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": access_token,
                "refresh_token": refresh_token,
                "expires_in": expires_in,
                "token_type": "bearer",
                "user": { "id": "user-1" }
            })))
            .mount(&self.server)
            .await;
    }

    /// Mount a rejected refresh-token exchange
    pub async fn mock_token_refresh_failure(&self, status_code: u16) {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(status_code).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "Invalid Refresh Token"
            })))
            .mount(&self.server)
            .await;
    }

    /// Mount a 200 response with `rows` for requests to `table`
    pub async fn mock_rows(&self, table: &str, rows: Value) {
        Mock::given(method("GET"))
            .and(path(Self::table_path(table)))
            .respond_with(ResponseTemplate::new(200).set_body_json(rows))
            .mount(&self.server)
            .await;
    }

    /// Mount a 200 response with `rows` for requests carrying `access_token`
    pub async fn mock_rows_for_token(&self, table: &str, access_token: &str, rows: Value) {
        Mock::given(method("GET"))
            .and(path(Self::table_path(table)))
            .and(header("Authorization", format!("Bearer {}", access_token).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(rows))
            .mount(&self.server)
            .await;
    }

    /// Mount a fixed status for requests to `table` carrying `access_token`
    pub async fn mock_status_for_token(&self, table: &str, access_token: &str, status_code: u16) {
        Mock::given(method("GET"))
            .and(path(Self::table_path(table)))
            .and(header("Authorization", format!("Bearer {}", access_token).as_str()))
            .respond_with(ResponseTemplate::new(status_code).set_body_json(json!({
                "message": "status from mock gateway"
            })))
            .mount(&self.server)
            .await;
    }

    /// Mount one response per status for requests to `path_str`, in order
    ///
    /// The last status keeps answering once the sequence is used up.
    pub async fn mock_status_sequence(&self, path_str: &str, statuses: &[u16]) {
        let Some((last, leading)) = statuses.split_last() else {
            return;
        };

        for status in leading {
            Mock::given(path(path_str))
                .respond_with(status_template(*status))
                .up_to_n_times(1)
                .mount(&self.server)
                .await;
        }

        Mock::given(path(path_str))
            .respond_with(status_template(*last))
            .mount(&self.server)
            .await;
    }

    /// Mount a response delayed by `delay_ms` for requests to `path_str`
    pub async fn mock_delay(&self, path_str: &str, delay_ms: u64) {
        Mock::given(path(path_str))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(std::time::Duration::from_millis(delay_ms))
                    .set_body_json(json!([])),
            )
            .mount(&self.server)
            .await;
    }

    /// Requests received on `path_str`
    pub async fn requests_to(&self, path_str: &str) -> Vec<Request> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|request| request.url.path() == path_str)
            .collect()
    }

    /// Number of requests received on `path_str`
    pub async fn request_count(&self, path_str: &str) -> usize {
        self.requests_to(path_str).await.len()
    }

    /// Number of refresh-token exchanges received
    pub async fn token_request_count(&self) -> usize {
        self.request_count(TOKEN_PATH).await
    }
}

fn status_template(status_code: u16) -> ResponseTemplate {
    if (200..300).contains(&status_code) {
        ResponseTemplate::new(status_code).set_body_json(json!([]))
    } else {
        ResponseTemplate::new(status_code).set_body_json(json!({
            "message": format!("mock status {}", status_code)
        }))
    }
}

/// Row fixture in the layout the table endpoint returns
pub fn note_row(id: &str, couple_key: &str, sender_id: &str, content_base64: &str) -> Value {
    json!({
        "id": id,
        "couple_key": couple_key,
        "sender_id": sender_id,
        "sender_name": "Partner",
        "content_base64": content_base64,
        "created_at": "2024-01-15 10:30:00.123456+00:00"
    })
}
