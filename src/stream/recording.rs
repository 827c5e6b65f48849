//! Recorded event logs for offline replay.
//!
//! Two formats are accepted: a raw SSE capture (as `curl -N` would print
//! it) or JSON lines of `{"name": ..., "payload": ...}`. Sequence numbers
//! are assigned in file order unless the line carries its own.

use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use super::{EventEnvelope, SseDecoder};
use crate::errors::RecordingError;

#[derive(Debug, Deserialize)]
struct RecordedLine {
    #[serde(alias = "event")]
    name: String,
    #[serde(default, alias = "data")]
    payload: Value,
    #[serde(default)]
    sequence: Option<u64>,
}

pub fn read_recording(path: &Path) -> Result<Vec<EventEnvelope>, RecordingError> {
    let content = std::fs::read_to_string(path).map_err(|source| RecordingError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_recording(&content)
}

pub fn parse_recording(content: &str) -> Result<Vec<EventEnvelope>, RecordingError> {
    if looks_like_sse(content) {
        return Ok(parse_sse(content));
    }

    let mut envelopes = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let recorded: RecordedLine =
            serde_json::from_str(line).map_err(|source| RecordingError::Line {
                line: index + 1,
                source,
            })?;
        let sequence = recorded.sequence.unwrap_or(envelopes.len() as u64);
        let payload = match recorded.payload {
            Value::String(text) => super::decode_payload(text),
            other => other,
        };
        envelopes.push(EventEnvelope::new(sequence, recorded.name, payload));
    }
    Ok(envelopes)
}

fn looks_like_sse(content: &str) -> bool {
    content
        .lines()
        .map(str::trim_start)
        .find(|line| !line.is_empty())
        .is_some_and(|line| {
            line.starts_with("event:") || line.starts_with("data:") || line.starts_with(':')
        })
}

fn parse_sse(content: &str) -> Vec<EventEnvelope> {
    let mut decoder = SseDecoder::new();
    let mut frames = decoder.feed(content.as_bytes());
    frames.extend(decoder.finish());
    frames
        .into_iter()
        .enumerate()
        .map(|(sequence, frame)| EventEnvelope::from_frame(sequence as u64, frame))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_lines() {
        let content = r#"
{"name": "connected", "payload": {}}
{"event": "api:project_configuration_agent:complete", "data": "{\"message\": \"ok\"}"}

{"name": "done", "sequence": 10}
"#;
        let events = parse_recording(content).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].sequence, 0);
        assert_eq!(events[1].name, "api:project_configuration_agent:complete");
        assert_eq!(events[1].payload, json!({"message": "ok"}));
        assert_eq!(events[2].sequence, 10);
        assert_eq!(events[2].payload, Value::Null);
    }

    #[test]
    fn test_bad_line_reports_line_number() {
        let err = parse_recording("{\"name\": \"connected\"}\n{oops\n").unwrap_err();
        assert!(matches!(err, RecordingError::Line { line: 2, .. }));
    }

    #[test]
    fn test_sse_capture() {
        let content = "event: connected\ndata: {}\n\n: keep-alive\n\nevent: status\ndata: not json\n";
        let events = parse_recording(content).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].name, "status");
        assert_eq!(events[1].sequence, 1);
        assert_eq!(events[1].payload, json!("not json"));
    }

    #[test]
    fn test_missing_file() {
        let err = read_recording(Path::new("/nonexistent/events.jsonl")).unwrap_err();
        assert!(matches!(err, RecordingError::Read { .. }));
    }
}
