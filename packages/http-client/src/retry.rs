//! HTTP client with fixed-delay retries for transient failures

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tandem_shared_config::HttpClientConfig;
use tracing::{debug, warn};

use crate::connectivity::{ConnectivityFlag, ConnectivityProbe};
use crate::error::{HttpError, HttpResult};
use crate::transport::{
    HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError,
    TransportErrorKind,
};

/// How a response status is handled by the retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 2xx
    Success,
    /// 401 and 400, handed back to the caller to interpret
    PassThrough,
    /// Other 4xx except 408
    ClientError,
    /// 5xx and 408
    Retryable,
    /// 1xx and 3xx
    Unexpected,
}

impl StatusClass {
    pub fn of(status: u16) -> Self {
        match status {
            200..=299 => StatusClass::Success,
            400 | 401 => StatusClass::PassThrough,
            408 => StatusClass::Retryable,
            402..=499 => StatusClass::ClientError,
            500..=599 => StatusClass::Retryable,
            _ => StatusClass::Unexpected,
        }
    }
}

/// Sends requests with a bounded number of constant-delay retries
///
/// Each call is independent: the only shared state is the connectivity
/// probe, consulted once before the first attempt. A call, retries and
/// delays included, never outlives the resource timeout.
#[derive(Clone)]
pub struct HttpRetryClient {
    transport: Arc<dyn HttpTransport>,
    connectivity: Arc<dyn ConnectivityProbe>,
    max_retries: u32,
    retry_delay: Duration,
    resource_timeout: Duration,
}

impl HttpRetryClient {
    /// Create a reqwest-backed client from configuration
    pub fn new(config: &HttpClientConfig) -> HttpResult<Self> {
        let transport = ReqwestTransport::new(config)?;
        Ok(Self::with_transport(
            Arc::new(transport),
            Arc::new(ConnectivityFlag::default()),
            config,
        ))
    }

    /// Create a client over a custom transport and probe (for testing)
    pub fn with_transport(
        transport: Arc<dyn HttpTransport>,
        connectivity: Arc<dyn ConnectivityProbe>,
        config: &HttpClientConfig,
    ) -> Self {
        Self {
            transport,
            connectivity,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
            resource_timeout: config.resource_timeout(),
        }
    }

    /// Replace the connectivity probe
    pub fn with_connectivity(mut self, connectivity: Arc<dyn ConnectivityProbe>) -> Self {
        self.connectivity = connectivity;
        self
    }

    /// Set retry configuration
    pub fn with_retry_config(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    /// Set the bound on a whole call
    pub fn with_resource_timeout(mut self, resource_timeout: Duration) -> Self {
        self.resource_timeout = resource_timeout;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn resource_timeout(&self) -> Duration {
        self.resource_timeout
    }

    /// Send with the configured retry bound and delay
    pub async fn perform_request(&self, request: &HttpRequest) -> HttpResult<HttpResponse> {
        self.perform_request_with(request, self.max_retries, self.retry_delay)
            .await
    }

    /// Send, retrying transient failures up to `max_retries` times
    ///
    /// 2xx, 400 and 401 responses are returned as-is. Other 4xx responses
    /// fail without retrying; 5xx and 408 are retried. Cancelled and
    /// authentication-required transport failures are never retried.
    pub async fn perform_request_with(
        &self,
        request: &HttpRequest,
        max_retries: u32,
        retry_delay: Duration,
    ) -> HttpResult<HttpResponse> {
        if !self.connectivity.is_online() {
            warn!(url = %request.url, "Offline, not sending request");
            return Err(HttpError::Connectivity);
        }

        let attempts = self.attempts(request, max_retries, retry_delay);
        match tokio::time::timeout(self.resource_timeout, attempts).await {
            Ok(result) => result,
            Err(_) => {
                let timeout_ms = self.resource_timeout.as_millis() as u64;
                warn!(url = %request.url, timeout_ms, "Resource timeout elapsed");
                Err(TransportError::new(
                    TransportErrorKind::Timeout,
                    format!("no response within {}ms", timeout_ms),
                )
                .into())
            }
        }
    }

    async fn attempts(
        &self,
        request: &HttpRequest,
        max_retries: u32,
        retry_delay: Duration,
    ) -> HttpResult<HttpResponse> {
        let mut last_error = None;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                tokio::time::sleep(retry_delay).await;
            }

            debug!(
                method = %request.method,
                url = %request.url,
                attempt = attempt + 1,
                "Sending request"
            );

            let error = match self.transport.send(request).await {
                Ok(response) => {
                    let status = response.status.as_u16();
                    match StatusClass::of(status) {
                        StatusClass::Success | StatusClass::PassThrough => return Ok(response),
                        StatusClass::ClientError => {
                            return Err(HttpError::Client {
                                status,
                                body: response.error_body(),
                            })
                        }
                        StatusClass::Unexpected => {
                            return Err(HttpError::UnexpectedStatus { status })
                        }
                        StatusClass::Retryable if status == 408 => HttpError::RequestTimeout,
                        StatusClass::Retryable => HttpError::Server { status },
                    }
                }
                Err(e) if e.is_retryable() => e,
                Err(e) => return Err(e),
            };

            if attempt < max_retries {
                warn!(
                    attempt = attempt + 1,
                    max_attempts = max_retries + 1,
                    delay_ms = retry_delay.as_millis() as u64,
                    error = %error,
                    "Retrying after transient error"
                );
            }
            last_error = Some(error);
        }

        Err(last_error.unwrap_or(HttpError::Unknown))
    }
}

impl fmt::Debug for HttpRetryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRetryClient")
            .field("online", &self.connectivity.is_online())
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("resource_timeout", &self.resource_timeout)
            .finish()
    }
}
