//! Per-upstream-protocol JSON field walking.
//!
//! The mediator never redacts or rehydrates the whole request/response body
//! — only the role-scoped text fields a human actually typed or will read
//! (spec.md §4.8: "never system-defined identifiers"). Each dialect knows
//! where those fields live in its own wire format; everything else (model
//! name, function-call arguments, usage counters, `role`) passes through
//! untouched.

use serde_json::Value;

/// Which upstream wire shape a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// OpenAI-style chat completions: `{messages:[{role,content}], ...}`.
    ChatCompletions,
    /// Anthropic-style messages: `{system?, messages:[{role,content}], ...}`.
    Messages,
    /// `{input: string | [string]}`.
    Embeddings,
}

impl Dialect {
    /// Maps an inbound mediator path to the dialect that understands it and
    /// the upstream path to forward to. `None` for passthrough-only routes
    /// (e.g. `/v1/models`) that carry no redactable body.
    pub fn for_path(path: &str) -> Option<(Self, &'static str)> {
        match path {
            "/v1/chat/completions" | "/chat/completions" => {
                Some((Self::ChatCompletions, "/v1/chat/completions"))
            }
            "/v1/embeddings" => Some((Self::Embeddings, "/v1/embeddings")),
            "/v1/messages" => Some((Self::Messages, "/v1/messages")),
            _ => None,
        }
    }
}

/// Collects JSON Pointer strings (RFC 6901) into `body` naming every
/// redactable string field for this dialect's request shape.
pub fn request_pointers(dialect: Dialect, body: &Value) -> Vec<String> {
    let mut pointers = Vec::new();
    match dialect {
        Dialect::ChatCompletions => {
            collect_message_pointers(body, "/messages", &mut pointers);
        }
        Dialect::Messages => {
            collect_text_block_pointers(body.get("system"), "/system", &mut pointers);
            collect_message_pointers(body, "/messages", &mut pointers);
        }
        Dialect::Embeddings => {
            match body.get("input") {
                Some(Value::String(_)) => pointers.push("/input".to_string()),
                Some(Value::Array(items)) => {
                    for (i, item) in items.iter().enumerate() {
                        if item.is_string() {
                            pointers.push(format!("/input/{i}"));
                        }
                    }
                }
                _ => {}
            }
        }
    }
    pointers
}

/// Collects pointer strings into a non-streaming response body's
/// rehydratable text fields.
pub fn response_pointers(dialect: Dialect, body: &Value) -> Vec<String> {
    let mut pointers = Vec::new();
    match dialect {
        Dialect::ChatCompletions => {
            if let Some(Value::Array(choices)) = body.get("choices") {
                for (i, choice) in choices.iter().enumerate() {
                    if choice
                        .get("message")
                        .and_then(|m| m.get("content"))
                        .is_some_and(Value::is_string)
                    {
                        pointers.push(format!("/choices/{i}/message/content"));
                    }
                }
            }
        }
        Dialect::Messages => {
            collect_text_block_pointers(body.get("content"), "/content", &mut pointers);
        }
        Dialect::Embeddings => {}
    }
    pointers
}

fn collect_message_pointers(body: &Value, root: &str, out: &mut Vec<String>) {
    let Some(Value::Array(messages)) = body.get("messages") else {
        return;
    };
    for (i, message) in messages.iter().enumerate() {
        let base = format!("{root}/{i}");
        match message.get("content") {
            Some(Value::String(_)) => out.push(format!("{base}/content")),
            Some(Value::Array(_)) => {
                collect_text_block_pointers(message.get("content"), &format!("{base}/content"), out);
            }
            _ => {}
        }
    }
}

/// A "content blocks" array shared by both Anthropic-style `system`/message
/// content and the Messages response body: `[{type:"text", text:"..."}, ...]`.
/// Non-text blocks (images, tool_use, tool_result) are left untouched.
fn collect_text_block_pointers(value: Option<&Value>, root: &str, out: &mut Vec<String>) {
    let Some(Value::Array(blocks)) = value else {
        return;
    };
    for (i, block) in blocks.iter().enumerate() {
        if block.get("type").and_then(Value::as_str) == Some("text")
            && block.get("text").is_some_and(Value::is_string)
        {
            out.push(format!("{root}/{i}/text"));
        }
    }
}

/// For one parsed SSE event's JSON payload, returns the JSON Pointer to its
/// single text-delta field, if this event carries one. Non-content frames
/// (role markers, `finish_reason`, tool-call deltas, `message_start`, usage)
/// return `None` and pass through the stream verbatim.
pub fn stream_delta_pointer(dialect: Dialect, event_type: Option<&str>, data: &Value) -> Option<String> {
    match dialect {
        Dialect::ChatCompletions | Dialect::Embeddings => {
            let choices = data.get("choices")?.as_array()?;
            for (i, choice) in choices.iter().enumerate() {
                if choice
                    .get("delta")
                    .and_then(|d| d.get("content"))
                    .is_some_and(Value::is_string)
                {
                    return Some(format!("/choices/{i}/delta/content"));
                }
            }
            None
        }
        Dialect::Messages => {
            if event_type != Some("content_block_delta") {
                return None;
            }
            let delta = data.get("delta")?;
            if delta.get("type").and_then(Value::as_str) == Some("text_delta")
                && delta.get("text").is_some_and(Value::is_string)
            {
                Some("/delta/text".to_string())
            } else {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chat_completions_string_content_pointer() {
        let body = json!({"messages": [{"role": "user", "content": "hi Jane"}]});
        let pointers = request_pointers(Dialect::ChatCompletions, &body);
        assert_eq!(pointers, vec!["/messages/0/content"]);
    }

    #[test]
    fn chat_completions_array_content_only_text_blocks() {
        let body = json!({"messages": [{"role": "user", "content": [
            {"type": "text", "text": "hi Jane"},
            {"type": "image_url", "image_url": {"url": "http://x"}}
        ]}]});
        let pointers = request_pointers(Dialect::ChatCompletions, &body);
        assert_eq!(pointers, vec!["/messages/0/content/0/text"]);
    }

    #[test]
    fn messages_dialect_walks_system_and_messages() {
        let body = json!({
            "system": [{"type": "text", "text": "be nice to Jane"}],
            "messages": [{"role": "user", "content": "hi"}]
        });
        let pointers = request_pointers(Dialect::Messages, &body);
        assert_eq!(pointers, vec!["/system/0/text", "/messages/0/content"]);
    }

    #[test]
    fn embeddings_array_input() {
        let body = json!({"input": ["a", "b"]});
        let pointers = request_pointers(Dialect::Embeddings, &body);
        assert_eq!(pointers, vec!["/input/0", "/input/1"]);
    }

    #[test]
    fn chat_completions_response_pointer() {
        let body = json!({"choices": [{"message": {"role": "assistant", "content": "hi"}}]});
        let pointers = response_pointers(Dialect::ChatCompletions, &body);
        assert_eq!(pointers, vec!["/choices/0/message/content"]);
    }

    #[test]
    fn stream_delta_pointer_chat_completions() {
        let data = json!({"choices": [{"delta": {"content": "hel"}}]});
        assert_eq!(
            stream_delta_pointer(Dialect::ChatCompletions, None, &data),
            Some("/choices/0/delta/content".to_string())
        );
    }

    #[test]
    fn stream_delta_pointer_messages_text_delta() {
        let data = json!({"delta": {"type": "text_delta", "text": "hel"}});
        assert_eq!(
            stream_delta_pointer(Dialect::Messages, Some("content_block_delta"), &data),
            Some("/delta/text".to_string())
        );
    }

    #[test]
    fn stream_delta_pointer_ignores_non_content_frames() {
        let data = json!({"type": "message_start"});
        assert_eq!(stream_delta_pointer(Dialect::Messages, Some("message_start"), &data), None);
    }

    #[test]
    fn path_for_known_and_unknown_routes() {
        assert_eq!(
            Dialect::for_path("/chat/completions"),
            Some((Dialect::ChatCompletions, "/v1/chat/completions"))
        );
        assert_eq!(Dialect::for_path("/v1/models"), None);
    }
}
