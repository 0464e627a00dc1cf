//! Decoding of loosely-typed change payloads
//!
//! The gateway has shipped several record layouts over time: snake_case and
//! camelCase keys, the record nested under `record`, `new` or `data.*`, and
//! timestamps as RFC 3339 or as Postgres text. Decoding tries a strict typed
//! schema first and falls back to a field-by-field pass before giving up.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::error::{RealtimeError, RealtimeResult};
use crate::models::{ChangeEvent, InboundFrame, CHANGE_EVENT};

/// Locations of the changed row inside a change payload, in priority order
const RECORD_PATHS: [&[&str]; 4] = [
    &["record"],
    &["new"],
    &["data", "record"],
    &["data", "new"],
];

/// Postgres text timestamps (`2024-01-15 10:30:00.123456+00:00`)
///
/// The second pattern accepts the hour-only offset Postgres emits for `+00`.
const POSTGRES_TIMESTAMP_FORMATS: [&str; 2] =
    ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%#z"];

/// Strict schema: the canonical snake_case row
#[derive(Debug, Deserialize)]
struct StrictRecord {
    id: Uuid,
    couple_key: String,
    sender_id: String,
    #[serde(default)]
    sender_name: Option<String>,
    content_base64: String,
    #[serde(default)]
    created_at: Option<String>,
}

impl From<StrictRecord> for ChangeEvent {
    fn from(raw: StrictRecord) -> Self {
        Self {
            id: raw.id,
            couple_key: raw.couple_key,
            sender_id: raw.sender_id,
            sender_name: raw.sender_name.filter(|name| !name.is_empty()),
            content_base64: raw.content_base64,
            created_at: resolve_timestamp(raw.created_at.as_deref()),
        }
    }
}

/// Decode one inbound text frame
///
/// Returns `Ok(None)` for frames that are not change events or carry no
/// record, so callers can drop them without treating them as failures.
pub fn decode_change_frame(text: &str) -> RealtimeResult<Option<ChangeEvent>> {
    let frame: InboundFrame = serde_json::from_str(text)?;
    if frame.event != CHANGE_EVENT {
        return Ok(None);
    }

    match extract_record(&frame.payload) {
        Some(record) => decode_record(record).map(Some),
        None => Ok(None),
    }
}

/// Find the changed row inside a change payload
pub fn extract_record(payload: &Value) -> Option<&Value> {
    RECORD_PATHS.iter().find_map(|path| {
        let mut current = payload;
        for key in path.iter() {
            current = current.get(key)?;
        }
        current.is_object().then_some(current)
    })
}

/// Decode a row into a [`ChangeEvent`]
pub fn decode_record(record: &Value) -> RealtimeResult<ChangeEvent> {
    match StrictRecord::deserialize(record) {
        Ok(strict) => Ok(strict.into()),
        Err(strict_err) => {
            debug!(error = %strict_err, "Strict record decode failed, trying permissive decode");
            decode_permissive(record)
        }
    }
}

fn decode_permissive(record: &Value) -> RealtimeResult<ChangeEvent> {
    let fields = record
        .as_object()
        .ok_or_else(|| RealtimeError::Parse("record is not an object".to_string()))?;

    let lookup = |keys: &[&str]| -> Option<String> {
        keys.iter()
            .filter_map(|key| fields.get(*key))
            .find_map(value_as_string)
    };
    let required = |keys: &[&str]| -> RealtimeResult<String> {
        lookup(keys).ok_or_else(|| RealtimeError::Parse(format!("missing field {}", keys[0])))
    };

    let raw_id = required(&["id"])?;
    let id = Uuid::parse_str(raw_id.trim())
        .map_err(|e| RealtimeError::Parse(format!("invalid id {:?}: {}", raw_id, e)))?;

    Ok(ChangeEvent {
        id,
        couple_key: required(&["couple_key", "coupleKey"])?,
        sender_id: required(&["sender_id", "senderId"])?,
        sender_name: lookup(&["sender_name", "senderName"]).filter(|name| !name.is_empty()),
        content_base64: required(&["content_base64", "contentBase64"])?,
        created_at: resolve_timestamp(lookup(&["created_at", "createdAt"]).as_deref()),
    })
}

/// Strings pass through; numbers are accepted for ids sent as integers
fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse an RFC 3339 or Postgres text timestamp into UTC
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    POSTGRES_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| DateTime::parse_from_str(raw, format).ok())
        .map(|parsed| parsed.with_timezone(&Utc))
}

/// Timestamp of a record, substituting the current time when unusable
pub fn resolve_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    match raw.and_then(parse_timestamp) {
        Some(timestamp) => timestamp,
        None => {
            debug!(raw = ?raw, "Unparseable record timestamp, using current time");
            Utc::now()
        }
    }
}
