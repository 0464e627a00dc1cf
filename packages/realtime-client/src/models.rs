//! Wire frames and decoded change events

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::RealtimeResult;

/// Event name of the channel join request
pub const JOIN_EVENT: &str = "phx_join";

/// Event name of keep-alive frames
pub const HEARTBEAT_EVENT: &str = "heartbeat";

/// Topic keep-alive frames are addressed to
pub const HEARTBEAT_TOPIC: &str = "phoenix";

/// Event name carrying row changes
pub const CHANGE_EVENT: &str = "postgres_changes";

/// A row inserted by a partner, decoded from a change frame or a REST row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub id: Uuid,
    pub couple_key: String,
    pub sender_id: String,
    pub sender_name: Option<String>,
    /// Opaque content, usually base64-encoded binary
    pub content_base64: String,
    pub created_at: DateTime<Utc>,
}

impl ChangeEvent {
    /// Decode the base64 content into bytes
    pub fn decode_content(&self) -> RealtimeResult<Vec<u8>> {
        Ok(STANDARD.decode(self.content_base64.trim())?)
    }

    /// Whether the event was written by the given user
    pub fn is_from(&self, user_id: &str) -> bool {
        self.sender_id == user_id
    }
}

/// Outbound wire message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl Frame {
    /// Join request subscribing to inserts on one table, filtered server-side
    pub fn join(topic: &str, table: &str, filter: &str) -> Self {
        Self {
            topic: topic.to_string(),
            event: JOIN_EVENT.to_string(),
            payload: json!({
                "config": {
                    "broadcast": { "ack": false },
                    "postgres_changes": [{
                        "event": "INSERT",
                        "schema": "public",
                        "table": table,
                        "filter": filter,
                    }]
                }
            }),
            reference: None,
        }
    }

    pub fn heartbeat() -> Self {
        Self {
            topic: HEARTBEAT_TOPIC.to_string(),
            event: HEARTBEAT_EVENT.to_string(),
            payload: json!({}),
            reference: None,
        }
    }

    pub fn with_reference(mut self, reference: u64) -> Self {
        self.reference = Some(reference.to_string());
        self
    }
}

/// Inbound wire message; only the event name and payload matter
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct InboundFrame {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

/// Lifecycle of a [`RealtimeChannelClient`](crate::RealtimeChannelClient)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Joined,
    ReconnectPending,
    Disconnected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Joined => write!(f, "joined"),
            Self::ReconnectPending => write!(f, "reconnect pending"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RealtimeError;

    fn sample_event(content: &str) -> ChangeEvent {
        ChangeEvent {
            id: Uuid::new_v4(),
            couple_key: "couple-1".to_string(),
            sender_id: "alice".to_string(),
            sender_name: None,
            content_base64: content.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_join_frame_shape() {
        let frame =
            Frame::join("realtime:public:notes", "notes", "couple_key=eq.k1").with_reference(1);
        let value = serde_json::to_value(&frame).unwrap();

        assert_eq!(value["topic"], "realtime:public:notes");
        assert_eq!(value["event"], "phx_join");
        assert_eq!(value["ref"], "1");
        assert_eq!(value["payload"]["config"]["broadcast"]["ack"], false);

        let change = &value["payload"]["config"]["postgres_changes"][0];
        assert_eq!(change["event"], "INSERT");
        assert_eq!(change["schema"], "public");
        assert_eq!(change["table"], "notes");
        assert_eq!(change["filter"], "couple_key=eq.k1");
    }

    #[test]
    fn test_heartbeat_frame_shape() {
        let value = serde_json::to_value(Frame::heartbeat().with_reference(7)).unwrap();
        assert_eq!(value["topic"], "phoenix");
        assert_eq!(value["event"], "heartbeat");
        assert_eq!(value["payload"], json!({}));
        assert_eq!(value["ref"], "7");
    }

    #[test]
    fn test_decode_content() {
        let event = sample_event("aGVsbG8=");
        assert_eq!(event.decode_content().unwrap(), b"hello");
    }

    #[test]
    fn test_decode_content_invalid() {
        let event = sample_event("not base64!!");
        assert!(matches!(
            event.decode_content(),
            Err(RealtimeError::Content(_))
        ));
    }

    #[test]
    fn test_is_from() {
        let event = sample_event("");
        assert!(event.is_from("alice"));
        assert!(!event.is_from("bob"));
    }

    #[test]
    fn test_inbound_frame_tolerates_missing_payload() {
        let frame: InboundFrame =
            serde_json::from_str(r#"{"event":"phx_reply","ref":null}"#).unwrap();
        assert_eq!(frame.event, "phx_reply");
        assert!(frame.payload.is_null());
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::default(), ConnectionState::Idle);
        assert_eq!(ConnectionState::ReconnectPending.to_string(), "reconnect pending");
    }
}
