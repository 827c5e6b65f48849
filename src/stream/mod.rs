//! Push channel plumbing: SSE decoding, the transport seam, the push-to-pull
//! bridge, the shared stream cache and recorded logs for replay.

pub mod bridge;
pub mod cache;
pub mod recording;
pub mod sse;
pub mod transport;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use bridge::{BridgeOptions, ChannelState, DONE_EVENT, EventBridge, EventFilter};
pub use cache::{
    CacheHandle, CacheKey, ChunkSubscription, FetchStatus, StreamCache, StreamOptions,
};
pub use recording::{parse_recording, read_recording};
pub use sse::{SseDecoder, SseFrame};
pub use transport::{ByteStream, ChannelTransport, HttpTransport};

/// One decoded server event as delivered to consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Position in the connection's delivery order, starting at 0.
    pub sequence: u64,
    pub name: String,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_event_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new(sequence: u64, name: impl Into<String>, payload: Value) -> Self {
        Self {
            sequence,
            name: name.into(),
            payload,
            last_event_id: None,
            received_at: Utc::now(),
        }
    }

    /// Build an envelope from a decoded frame.
    ///
    /// The data is decoded as JSON; text that is not valid JSON is kept
    /// verbatim as a string payload.
    pub fn from_frame(sequence: u64, frame: SseFrame) -> Self {
        let payload = decode_payload(frame.data);
        Self {
            sequence,
            name: frame.event,
            payload,
            last_event_id: frame.id,
            received_at: Utc::now(),
        }
    }

    /// Human readable message carried by the event, if any.
    pub fn message(&self) -> Option<&str> {
        match &self.payload {
            Value::String(text) => Some(text),
            Value::Object(map) => map.get("message").and_then(Value::as_str),
            _ => None,
        }
    }
}

pub fn decode_payload(data: String) -> Value {
    serde_json::from_str(&data).unwrap_or(Value::String(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_payload_is_decoded() {
        let frame = SseFrame {
            event: "progress".to_string(),
            data: r#"{"message":"Cloning repository","status":"running"}"#.to_string(),
            id: Some("7".to_string()),
        };
        let envelope = EventEnvelope::from_frame(3, frame);
        assert_eq!(envelope.sequence, 3);
        assert_eq!(envelope.name, "progress");
        assert_eq!(envelope.payload["status"], "running");
        assert_eq!(envelope.last_event_id.as_deref(), Some("7"));
        assert_eq!(envelope.message(), Some("Cloning repository"));
    }

    #[test]
    fn test_non_json_payload_falls_back_to_string() {
        let frame = SseFrame {
            event: "status".to_string(),
            data: "analysis complete for api".to_string(),
            id: None,
        };
        let envelope = EventEnvelope::from_frame(0, frame);
        assert_eq!(envelope.payload, json!("analysis complete for api"));
        assert_eq!(envelope.message(), Some("analysis complete for api"));
    }

    #[test]
    fn test_message_absent_for_non_text_payloads() {
        let envelope = EventEnvelope::new(0, "progress", json!(42));
        assert_eq!(envelope.message(), None);
        let envelope = EventEnvelope::new(0, "progress", json!({"status": "running"}));
        assert_eq!(envelope.message(), None);
    }

    #[test]
    fn test_envelope_deserializes_without_timestamp() {
        let envelope: EventEnvelope =
            serde_json::from_str(r#"{"sequence":1,"name":"done","payload":null}"#).unwrap();
        assert_eq!(envelope.name, "done");
        assert!(envelope.last_event_id.is_none());
    }
}
