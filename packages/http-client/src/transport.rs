//! Request/response types and the transport seam under the retry client

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tandem_shared_config::HttpClientConfig;
use thiserror::Error;

use crate::error::{HttpError, HttpResult};

/// Maximum error body size kept in errors
const MAX_ERROR_BODY_SIZE: usize = 1000;

/// A fully formed request that can be sent more than once
#[derive(Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    /// Add a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Add an `Authorization: Bearer <token>` header
    pub fn bearer(self, token: &str) -> Self {
        self.header(AUTHORIZATION.as_str(), format!("Bearer {}", token))
    }

    /// Set a JSON body and content type
    pub fn json<T: Serialize>(self, body: &T) -> HttpResult<Self> {
        let bytes = serde_json::to_vec(body)?;
        let mut request = self.header(CONTENT_TYPE.as_str(), "application/json");
        request.body = Some(Bytes::from(bytes));
        Ok(request)
    }

    fn header_map(&self) -> HttpResult<HeaderMap> {
        let mut map = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| HttpError::InvalidRequest(format!("header name {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| HttpError::InvalidRequest(format!("header {}: {}", name, e)))?;
            map.append(name, value);
        }
        Ok(map)
    }
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<(&str, &str)> = self
            .headers
            .iter()
            .map(|(name, value)| {
                let sensitive = name.eq_ignore_ascii_case("authorization")
                    || name.eq_ignore_ascii_case("apikey");
                (name.as_str(), if sensitive { "[REDACTED]" } else { value.as_str() })
            })
            .collect();

        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &headers)
            .field("body_len", &self.body.as_ref().map(|b| b.len()))
            .finish()
    }
}

/// Status, headers and body of a completed exchange
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> HttpResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Body as text, truncated for error messages
    ///
    /// Safely handles UTF-8 boundaries to avoid panics on multi-byte characters
    pub fn error_body(&self) -> String {
        let body = String::from_utf8_lossy(&self.body);
        if body.len() <= MAX_ERROR_BODY_SIZE {
            return body.into_owned();
        }

        let truncate_at = body
            .char_indices()
            .map(|(i, _)| i)
            .take_while(|i| *i <= MAX_ERROR_BODY_SIZE)
            .last()
            .unwrap_or(0);

        format!("{}... (truncated)", &body[..truncate_at])
    }
}

/// Class of a failure below the HTTP layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    /// The request was cancelled before completing
    Cancelled,
    /// A proxy or the platform demanded credentials
    AuthenticationRequired,
    Other,
}

/// Failure below the HTTP layer
#[derive(Error, Debug, Clone)]
#[error("Transport error ({kind:?}): {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Cancelled and authentication-required failures are never retried
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            TransportErrorKind::Cancelled | TransportErrorKind::AuthenticationRequired
        )
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let kind = classify_reqwest_error(&err);
        TransportError::new(kind, err.to_string())
    }
}

/// Map a reqwest failure to a transport class
///
/// reqwest exposes timeouts and connect failures directly. Cancellation and
/// proxy authentication only show up in the source chain, so those are
/// recognised from the underlying hyper/io errors.
fn classify_reqwest_error(err: &reqwest::Error) -> TransportErrorKind {
    let mut auth_required = false;
    let mut cancelled = false;

    let mut source: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(current) = source {
        let text = current.to_string().to_ascii_lowercase();
        if text.contains("proxy authentication required") {
            auth_required = true;
        }
        if text.contains("operation was canceled") {
            cancelled = true;
        }
        if let Some(io) = current.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::Interrupted {
                cancelled = true;
            }
        }
        source = current.source();
    }

    if auth_required || err.status() == Some(StatusCode::PROXY_AUTHENTICATION_REQUIRED) {
        TransportErrorKind::AuthenticationRequired
    } else if cancelled {
        TransportErrorKind::Cancelled
    } else if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_connect() {
        TransportErrorKind::Connect
    } else {
        TransportErrorKind::Other
    }
}

/// Sends one request, no retries
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> HttpResult<HttpResponse>;
}

/// reqwest-backed transport with connection pooling
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http_client: Client,
    attempt_timeout: Option<Duration>,
}

impl ReqwestTransport {
    /// Build a client bounded by the configured request timeout
    ///
    /// Every attempt, from connecting to reading the last body byte, gets
    /// the request timeout. The resource timeout is enforced across
    /// attempts by the retry client.
    pub fn new(config: &HttpClientConfig) -> HttpResult<Self> {
        let http_client = Client::builder()
            .connect_timeout(config.request_timeout())
            .pool_max_idle_per_host(5)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent("Tandem/1.0")
            .build()
            .map_err(TransportError::from)?;

        Ok(Self {
            http_client,
            attempt_timeout: Some(config.request_timeout()),
        })
    }

    /// Create a transport with a custom HTTP client (for testing)
    ///
    /// The client's own timeouts apply unchanged.
    pub fn with_client(http_client: Client) -> Self {
        Self {
            http_client,
            attempt_timeout: None,
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> HttpResult<HttpResponse> {
        let mut builder = self
            .http_client
            .request(request.method.clone(), &request.url)
            .headers(request.header_map()?);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        if let Some(timeout) = self.attempt_timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(TransportError::from)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(TransportError::from)?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_debug_redacts_credentials() {
        let request = HttpRequest::get("https://example.co/rest/v1/notes")
            .header("apikey", "public-key-secret")
            .bearer("access-secret")
            .header("Accept", "application/json");

        let debug_str = format!("{:?}", request);
        assert!(!debug_str.contains("public-key-secret"));
        assert!(!debug_str.contains("access-secret"));
        assert!(debug_str.contains("[REDACTED]"));
        assert!(debug_str.contains("application/json"));
    }

    #[test]
    fn test_json_body_sets_content_type() {
        let request = HttpRequest::post("https://example.co/auth/v1/token")
            .json(&json!({"refresh_token": "r"}))
            .unwrap();

        assert_eq!(request.body.as_deref(), Some(br#"{"refresh_token":"r"}"#.as_slice()));
        let headers = request.header_map().unwrap();
        assert_eq!(headers[CONTENT_TYPE], "application/json");
    }

    #[test]
    fn test_invalid_header_is_rejected() {
        let request = HttpRequest::get("https://example.co").header("bad header", "x");
        assert!(matches!(request.header_map(), Err(HttpError::InvalidRequest(_))));
    }

    #[test]
    fn test_error_body_truncation() {
        let response = HttpResponse {
            status: StatusCode::BAD_GATEWAY,
            headers: HeaderMap::new(),
            body: Bytes::from("é".repeat(800)),
        };
        let body = response.error_body();
        assert!(body.ends_with("... (truncated)"));
        assert!(body.len() < 1100);
    }

    #[tokio::test]
    async fn test_connection_refused_is_connect_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let transport = ReqwestTransport::new(&HttpClientConfig::default()).unwrap();
        let result = transport
            .send(&HttpRequest::get(format!("http://127.0.0.1:{}/unreachable", port)))
            .await;

        match result {
            Err(HttpError::Transport(e)) => {
                assert_eq!(e.kind, TransportErrorKind::Connect);
                assert!(!e.is_terminal());
            }
            other => panic!("expected transport error, got {:?}", other),
        }
    }
}
