//! Clock and id helpers, and the JSON envelope every command prints.

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::time::{SystemTime, UNIX_EPOCH};
use ulid::Ulid;

pub const MS_PER_SEC: i64 = 1_000;
pub const MS_PER_DAY: i64 = 24 * 60 * 60 * MS_PER_SEC;
pub const ENVELOPE_VERSION: &str = "1.0.0";

/// Unix-epoch milliseconds. A clock before 1970 reads as 0.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Unix-epoch seconds with a `Z` suffix, e.g. `1771220592Z`.
pub fn now_epoch_z() -> String {
    format!("{}Z", now_ms() / MS_PER_SEC)
}

/// Event, message and reservation ids are ULIDs, so they sort by creation time.
pub fn new_event_id() -> String {
    Ulid::new().to_string()
}

#[derive(Serialize)]
struct Envelope<'a> {
    envelope_version: &'static str,
    ts: String,
    event_id: String,
    cmd: &'a str,
    status: &'a str,
    #[serde(flatten)]
    payload: Map<String, JsonValue>,
}

/// Wrap a command result. Object payloads are merged into the envelope;
/// anything else lands under `result`.
pub fn command_envelope(cmd: &str, status: &str, payload: JsonValue) -> JsonValue {
    let payload = match payload {
        JsonValue::Object(map) => map,
        JsonValue::Null => Map::new(),
        other => Map::from_iter([("result".to_string(), other)]),
    };
    let envelope = Envelope {
        envelope_version: ENVELOPE_VERSION,
        ts: now_epoch_z(),
        event_id: new_event_id(),
        cmd,
        status,
        payload,
    };
    serde_json::to_value(envelope).unwrap_or(JsonValue::Null)
}
