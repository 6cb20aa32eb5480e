//! Decoding of sync event-stream frames.

use crate::transport::SseEvent;
use docbridge_types::{SyncProgress, SyncStatus};
use serde::Deserialize;
use serde_json::Value as JsonValue;

/// Message used when an `error` event carries no text.
const DEFAULT_ERROR_MESSAGE: &str = "sync failed";

/// A decoded sync event.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SyncEvent {
    /// Server-side job state, sent as the first frame of a connection.
    Status(SyncStatus),
    Progress(SyncProgress),
    Completed(SyncProgress),
    Failed(String),
    Ping,
    /// Any event name this client does not handle.
    Other(String),
}

#[derive(Debug, Deserialize)]
struct StatusPayload {
    status: SyncStatus,
}

/// Decode one frame. Only `status`, `progress` and `completed` payloads can
/// be malformed; `error` always yields a message.
pub(crate) fn parse_event(event: &SseEvent) -> Result<SyncEvent, serde_json::Error> {
    let data = event.data.trim();
    match event.event.as_str() {
        "ping" => Ok(SyncEvent::Ping),
        "status" => parse_status(data).map(SyncEvent::Status),
        "progress" => serde_json::from_str(data).map(SyncEvent::Progress),
        "completed" if data.is_empty() => Ok(SyncEvent::Completed(SyncProgress::default())),
        "completed" => serde_json::from_str(data).map(SyncEvent::Completed),
        "error" => Ok(SyncEvent::Failed(error_message(data))),
        other => Ok(SyncEvent::Other(other.to_string())),
    }
}

/// Accepts `"idle"`, `{"status":"idle"}` and a bare `idle`.
fn parse_status(data: &str) -> Result<SyncStatus, serde_json::Error> {
    serde_json::from_str::<SyncStatus>(data)
        .or_else(|_| serde_json::from_str::<StatusPayload>(data).map(|payload| payload.status))
        .or_else(|_| serde_json::from_value(JsonValue::String(data.to_string())))
}

fn error_message(data: &str) -> String {
    let text = match serde_json::from_str::<JsonValue>(data) {
        Ok(JsonValue::Object(map)) => ["error", "message"]
            .iter()
            .find_map(|key| map.get(*key).and_then(JsonValue::as_str).map(str::to_string))
            .unwrap_or_default(),
        Ok(JsonValue::String(text)) => text,
        _ => data.to_string(),
    };
    let text = text.trim();
    if text.is_empty() {
        DEFAULT_ERROR_MESSAGE.to_string()
    } else {
        text.to_string()
    }
}
