use serde_json::Value;
use tether_types::{ClientRequest, ServerEvent};
use tracing::warn;

use crate::error::Result;

const KNOWN_EVENT_TYPES: &[&str] = &[
    "delta",
    "done",
    "error",
    "conversation_snapshot",
    "conversation_started",
];

pub fn encode_request(request: &ClientRequest) -> Result<String> {
    Ok(serde_json::to_string(request)?)
}

/// Decode one JSON document into a server event
///
/// Returns `Ok(None)` for well-formed documents of a type this client does
/// not understand, so newer backends do not break older clients.
pub fn decode_event(data: &str) -> Result<Option<ServerEvent>> {
    let value: Value = serde_json::from_str(data)?;

    let event_type = value.get("type").and_then(Value::as_str).unwrap_or_default();
    if !KNOWN_EVENT_TYPES.contains(&event_type) {
        warn!(event_type = %event_type, "Skipping unknown server event");
        return Ok(None);
    }

    Ok(Some(serde_json::from_value(value)?))
}

/// Decode a text frame
///
/// A frame normally carries one JSON document but backends may batch
/// several newline-delimited documents into one frame. Events come back in
/// frame order; a malformed line yields an error without dropping the rest.
pub fn decode_frame(frame: &str) -> Vec<Result<ServerEvent>> {
    frame
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| decode_event(line).transpose())
        .collect()
}
