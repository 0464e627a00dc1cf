//! HTTP client for the Tandem gateway
//!
//! This crate provides the request path used when no realtime connection is
//! open:
//! - [`HttpRetryClient`] retries transient failures with a constant delay
//! - [`SessionRefresher`] renews an expired access token once per call
//! - [`LatestEventFetcher`] pulls the newest change for a couple
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tandem_http_client::{
//!     FileCredentialStore, HttpRetryClient, LatestEventFetcher, SessionRefresher,
//! };
//! use tandem_shared_config::{GatewayConfig, HttpClientConfig, RealtimeConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpRetryClient::new(&HttpClientConfig::default())?;
//! let store = Arc::new(FileCredentialStore::new("session.json"));
//! let refresher = SessionRefresher::new(client, GatewayConfig::from_env()?, store);
//!
//! let fetcher = LatestEventFetcher::new(refresher, &RealtimeConfig::default());
//! if let Some(event) = fetcher.fetch_latest("couple-key").await? {
//!     println!("latest change from {}", event.sender_id);
//! }
//! # Ok(())
//! # }
//! ```

mod connectivity;
mod credentials;
mod error;
mod retry;
mod session;
mod sync;
mod transport;

pub use connectivity::{probe_target, ConnectivityFlag, ConnectivityMonitor, ConnectivityProbe};
pub use credentials::{
    CredentialStore, FileCredentialStore, InMemoryCredentialStore, SessionCredentials,
};
pub use error::{HttpError, HttpResult};
pub use retry::{HttpRetryClient, StatusClass};
pub use session::{SessionRefresher, TokenResponse, TokenUser};
pub use sync::LatestEventFetcher;
pub use transport::{
    HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError,
    TransportErrorKind,
};
