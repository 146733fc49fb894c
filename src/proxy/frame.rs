//! SSE frame parsing, adapted from the teacher's provider-streaming code
//! (`providers::sse::parse_sse_chunk`, used the same way inside
//! `providers::anthropic`'s streaming loop: accumulate raw bytes into a
//! string buffer, parse whatever complete `event:`/`data:` blocks are
//! present, and keep the remainder — after the last `\n\n` — for the next
//! read). The mediator runs this same buffer-and-parse loop against the
//! *upstream* response instead of a provider's own stream.

use serde_json::Value;

/// One parsed SSE event: an optional `event:` line and the JSON payload of
/// its `data:` line(s), or `None` for the `data: [DONE]` sentinel.
#[derive(Debug, Clone)]
pub struct SseEvent {
    pub event_type: Option<String>,
    pub data: Option<Value>,
}

/// Parses as many complete events as are present in `chunk` (terminated by
/// a blank line). Does not attempt to recover a trailing partial event —
/// callers keep accumulating into the same buffer and re-parse.
pub fn parse_sse_chunk(chunk: &str) -> Vec<SseEvent> {
    let mut events = Vec::new();
    let mut current_event_type: Option<String> = None;
    let mut current_data = String::new();
    let mut saw_any_field = false;

    let mut flush = |event_type: &mut Option<String>, data: &mut String, saw: &mut bool, out: &mut Vec<SseEvent>| {
        if *saw {
            let trimmed = data.trim();
            let parsed = if trimmed == "[DONE]" {
                None
            } else {
                serde_json::from_str::<Value>(trimmed).ok()
            };
            out.push(SseEvent { event_type: event_type.take(), data: parsed });
        }
        data.clear();
        *saw = false;
    };

    for line in chunk.lines() {
        if line.is_empty() {
            flush(&mut current_event_type, &mut current_data, &mut saw_any_field, &mut events);
        } else if let Some(event_type) = line.strip_prefix("event:") {
            current_event_type = Some(event_type.trim().to_string());
            saw_any_field = true;
        } else if let Some(data) = line.strip_prefix("data:") {
            if !current_data.is_empty() {
                current_data.push('\n');
            }
            current_data.push_str(data.trim_start());
            saw_any_field = true;
        }
    }
    events
}

/// Renders a single SSE frame: `event: <type>\ndata: <json>\n\n`, or just
/// `data: <json>\n\n` when there's no event type.
pub fn render_event(event_type: Option<&str>, data: &Value) -> String {
    let mut out = String::new();
    if let Some(t) = event_type {
        out.push_str("event: ");
        out.push_str(t);
        out.push('\n');
    }
    out.push_str("data: ");
    out.push_str(&data.to_string());
    out.push_str("\n\n");
    out
}

/// Renders the upstream `[DONE]` sentinel frame verbatim.
pub fn render_done() -> String {
    "data: [DONE]\n\n".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_event_with_type() {
        let chunk = "event: message_start\ndata: {\"type\":\"message_start\"}\n\n";
        let events = parse_sse_chunk(chunk);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type.as_deref(), Some("message_start"));
        assert!(events[0].data.is_some());
    }

    #[test]
    fn parses_multiple_events_in_one_chunk() {
        let chunk = "data: {\"a\":1}\n\ndata: {\"b\":2}\n\n";
        let events = parse_sse_chunk(chunk);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn parses_done_sentinel() {
        let events = parse_sse_chunk("data: [DONE]\n\n");
        assert_eq!(events.len(), 1);
        assert!(events[0].data.is_none());
    }

    #[test]
    fn ignores_trailing_partial_event() {
        let events = parse_sse_chunk("data: {\"a\":1}\n\ndata: {\"b\":2}");
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn render_event_roundtrips_through_parser() {
        let rendered = render_event(Some("content_block_delta"), &serde_json::json!({"x": 1}));
        let parsed = parse_sse_chunk(&rendered);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].event_type.as_deref(), Some("content_block_delta"));
        assert_eq!(parsed[0].data.as_ref().unwrap()["x"], 1);
    }
}
