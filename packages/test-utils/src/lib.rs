//! Shared test utilities for Tandem workspace
//!
//! This crate provides mock implementations of the gateway for testing
//! without network dependencies. These mocks are used across the client
//! and sync-agent test suites.
//!
//! # Mock Services
//!
//! - [`MockRealtimeGateway`] - Websocket gateway that records client frames and pushes events
//! - [`MockGatewayServer`] - Mock REST and token endpoints for retry and refresh tests
//!
//! # Example
//!
//! ```rust,ignore
//! use tandem_test_utils::{MockGatewayServer, MockRealtimeGateway};
//!
//! #[tokio::test]
//! async fn test_with_mocks() {
//!     let rest = MockGatewayServer::start().await;
//!     rest.mock_token_refresh_success("access", "refresh", 3600).await;
//!
//!     let realtime = MockRealtimeGateway::start().await;
//!     // Use rest.url() and realtime.url() to configure your clients
//! }
//! ```

mod gateway;
mod realtime;

pub use gateway::{note_row, MockGatewayServer, TOKEN_PATH};
pub use realtime::{ConnectionRecord, MockRealtimeGateway};
