//! Realtime change-notification client for Tandem
//!
//! This crate keeps a websocket open to the gateway's realtime endpoint,
//! joins the change channel of one table filtered to a couple key, and
//! streams partner-inserted rows to the host application:
//! - Join with a server-side `couple_key=eq.<key>` filter
//! - Keep-alive heartbeat while joined
//! - Fixed-delay, single-flight reconnect after socket failures
//! - Tolerant decoding of the several record layouts the gateway emits
//!
//! # Example
//!
//! ```rust,no_run
//! use futures_util::StreamExt;
//! use tandem_realtime_client::{ConnectionConfig, RealtimeChannelClient};
//! use tandem_shared_config::{GatewayConfig, RealtimeConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let gateway = GatewayConfig::from_env()?;
//! let client = RealtimeChannelClient::new(RealtimeConfig::default());
//!
//! let config = ConnectionConfig::new(&gateway, "access-token", "couple-key", "my-user-id");
//! let mut events = client.connect(config).await?;
//!
//! while let Some(event) = events.next().await {
//!     println!("{} wrote {} bytes", event.sender_id, event.decode_content()?.len());
//! }
//!
//! client.disconnect().await;
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod heartbeat;
mod models;
pub mod payload;
mod reconnect;
mod scheduler;
mod socket;

pub use client::{ChangeEventStream, ConnectionConfig, RealtimeChannelClient};
pub use error::{RealtimeError, RealtimeResult};
pub use heartbeat::HeartbeatScheduler;
pub use models::{
    ChangeEvent, ConnectionState, Frame, CHANGE_EVENT, HEARTBEAT_EVENT, HEARTBEAT_TOPIC,
    JOIN_EVENT,
};
pub use reconnect::ReconnectPolicy;
pub use scheduler::ScheduledTask;
pub use socket::{build_socket_url, REALTIME_PATH};
