//! Lenient decoding of notification payloads.
//!
//! Poll responses and push frames arrive in several envelope shapes. Every
//! entry carrying an id becomes a record; missing or odd fields degrade to
//! defaults instead of failing the entry.

use crate::error::{Result, SyncError};
use crate::types::{NotificationId, NotificationKind, NotificationRecord};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, warn};

const ID_KEYS: &[&str] = &["id", "_id", "notificationId"];
const READ_KEYS: &[&str] = &["read", "isRead", "is_read"];
const CREATED_KEYS: &[&str] = &["createdAt", "created_at", "timestamp"];
const ENVELOPE_KEYS: &[&str] = &["notification", "payload", "data"];

/// What a single push frame turned out to be.
#[derive(Clone, Debug, PartialEq)]
pub enum PushPayload {
    /// One or more notifications.
    Records(Vec<NotificationRecord>),
    /// Not a notification (heartbeat, other event, unparseable frame).
    Ignored(String),
}

/// Decode one JSON object into a record.
///
/// Only a missing id is fatal: without it the record cannot be deduplicated.
pub fn decode_record(value: &Value, received_at: DateTime<Utc>) -> Result<NotificationRecord> {
    let obj = value
        .as_object()
        .ok_or_else(|| SyncError::MalformedRecord("expected a JSON object".to_string()))?;

    let id = first_field(obj, ID_KEYS)
        .and_then(scalar_string)
        .ok_or_else(|| SyncError::MalformedRecord("missing id".to_string()))?;

    let kind = obj
        .get("type")
        .and_then(Value::as_str)
        .map(NotificationKind::from)
        .unwrap_or_else(|| NotificationKind::Other(String::new()));

    let data = match obj.get("data") {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };

    let read = first_field(obj, READ_KEYS)
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let created = first_field(obj, CREATED_KEYS).and_then(parse_timestamp);

    Ok(NotificationRecord {
        id: NotificationId(id),
        kind,
        data,
        read,
        created_at: created.unwrap_or(received_at),
        created_at_estimated: created.is_none(),
        title: string_field(obj, "title"),
        message: string_field(obj, "message"),
        action_url: string_field(obj, "actionUrl").or_else(|| string_field(obj, "action_url")),
    })
}

/// Decode the body of `GET /notifications`.
///
/// Fails only when the overall shape is unrecognizable; individual bad
/// entries are skipped.
pub fn decode_poll_response(body: &Value, received_at: DateTime<Utc>) -> Result<Vec<NotificationRecord>> {
    let entries = match body {
        Value::Array(items) => items,
        Value::Object(obj) => match (obj.get("data"), obj.get("notifications")) {
            (Some(Value::Array(items)), _) => items,
            (Some(Value::Object(inner)), _) => match inner.get("notifications") {
                Some(Value::Array(items)) => items,
                _ => {
                    return Err(SyncError::Deserialization(
                        "response data has no notifications list".to_string(),
                    ))
                }
            },
            (_, Some(Value::Array(items))) => items,
            _ => {
                return Err(SyncError::Deserialization(
                    "unrecognized notifications response".to_string(),
                ))
            }
        },
        _ => {
            return Err(SyncError::Deserialization(
                "notifications response is not JSON object or array".to_string(),
            ))
        }
    };

    Ok(decode_entries(entries, received_at))
}

/// Classify and decode one text frame from the push channel.
pub fn decode_push_payload(payload: &str, received_at: DateTime<Utc>) -> PushPayload {
    let value: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "Push frame is not valid JSON");
            return PushPayload::Ignored("invalid json".to_string());
        }
    };

    match &value {
        Value::Array(items) => PushPayload::Records(decode_entries(items, received_at)),
        Value::Object(obj) => {
            if first_field(obj, ID_KEYS).is_some() {
                return match decode_record(&value, received_at) {
                    Ok(record) => PushPayload::Records(vec![record]),
                    Err(e) => {
                        warn!(error = %e, "Dropping push frame");
                        PushPayload::Ignored(e.to_string())
                    }
                };
            }

            for key in ENVELOPE_KEYS {
                match obj.get(*key) {
                    Some(inner @ Value::Object(inner_obj)) if first_field(inner_obj, ID_KEYS).is_some() => {
                        return match decode_record(inner, received_at) {
                            Ok(record) => PushPayload::Records(vec![record]),
                            Err(e) => PushPayload::Ignored(e.to_string()),
                        };
                    }
                    Some(Value::Array(items)) => {
                        return PushPayload::Records(decode_entries(items, received_at));
                    }
                    _ => {}
                }
            }

            let event = obj
                .get("event")
                .or_else(|| obj.get("type"))
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            debug!(event = %event, "Ignoring non-notification push frame");
            PushPayload::Ignored(event)
        }
        _ => PushPayload::Ignored("scalar frame".to_string()),
    }
}

fn decode_entries(items: &[Value], received_at: DateTime<Utc>) -> Vec<NotificationRecord> {
    items
        .iter()
        .filter_map(|item| match decode_record(item, received_at) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(error = %e, "Skipping notification entry");
                None
            }
        })
        .collect()
}

fn first_field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| obj.get(*key))
        .find(|value| !value.is_null())
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn string_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// RFC 3339, naive ISO (assumed UTC), or epoch milliseconds.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            }),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}
