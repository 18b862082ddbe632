//! Anthropic SSE parsing
//!
//! [`SseLineBuffer`] reassembles `data:` payloads from arbitrary byte chunks;
//! [`AnthropicParser`] turns those payloads into [`StreamEvent`]s, collecting
//! tool-call arguments per content block until the block closes.

use std::collections::HashMap;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::warn;

use super::types::{StreamEvent, ToolCall};

/// Splits a byte stream into SSE `data:` payloads
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns the payloads of every line completed by it.
    ///
    /// Lines are split on raw bytes, so multi-byte characters cut across
    /// chunks are reassembled before decoding.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut payloads = Vec::new();

        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim_start().to_string());
            }
        }
        payloads
    }
}

struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    /// Parse collected arguments; an empty buffer means no arguments.
    fn complete(self) -> ToolCall {
        let input = if self.arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str(&self.arguments) {
                Ok(value) => value,
                Err(e) => {
                    warn!(
                        tool = %self.name,
                        error = %e,
                        "Incomplete tool arguments, passing as raw text"
                    );
                    Value::String(self.arguments)
                }
            }
        };
        ToolCall {
            id: self.id,
            name: self.name,
            input,
        }
    }
}

/// Stateful parser for one streamed Messages API response
#[derive(Default)]
pub struct AnthropicParser {
    tool_accumulators: HashMap<u64, ToolCallAccumulator>,
    stop_reason: Option<String>,
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

impl AnthropicParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one `data:` payload
    pub fn parse(&mut self, data: &str) -> Result<Option<StreamEvent>> {
        let json: Value =
            serde_json::from_str(data).with_context(|| format!("Invalid SSE payload: {}", data))?;
        let event_type = json.get("type").and_then(|t| t.as_str()).unwrap_or("");
        let index = json.get("index").and_then(|i| i.as_u64()).unwrap_or(0);

        match event_type {
            "content_block_start" => {
                if let Some(block) = json.get("content_block") {
                    if block.get("type").and_then(|t| t.as_str()) == Some("tool_use") {
                        self.tool_accumulators.insert(
                            index,
                            ToolCallAccumulator {
                                id: str_field(block, "id"),
                                name: str_field(block, "name"),
                                arguments: String::new(),
                            },
                        );
                    }
                }
                Ok(None)
            }

            "content_block_delta" => {
                let Some(delta) = json.get("delta") else {
                    return Ok(None);
                };
                match delta.get("type").and_then(|t| t.as_str()) {
                    Some("text_delta") => {
                        Ok(Some(StreamEvent::TextDelta(str_field(delta, "text"))))
                    }
                    Some("input_json_delta") => {
                        if let Some(acc) = self.tool_accumulators.get_mut(&index) {
                            acc.arguments.push_str(&str_field(delta, "partial_json"));
                        }
                        Ok(None)
                    }
                    _ => Ok(None),
                }
            }

            "content_block_stop" => Ok(self
                .tool_accumulators
                .remove(&index)
                .map(|acc| StreamEvent::ToolCall(acc.complete()))),

            "message_delta" => {
                if let Some(reason) = json
                    .get("delta")
                    .and_then(|d| d.get("stop_reason"))
                    .and_then(|s| s.as_str())
                {
                    self.stop_reason = Some(reason.to_string());
                }
                Ok(None)
            }

            "message_stop" => Ok(Some(StreamEvent::Stop {
                reason: self.stop_reason.take(),
            })),

            "error" => {
                let error = json.get("error").cloned().unwrap_or(Value::Null);
                anyhow::bail!(
                    "Model stream error ({}): {}",
                    str_field(&error, "type"),
                    str_field(&error, "message")
                )
            }

            // message_start, ping
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse_all(parser: &mut AnthropicParser, payloads: &[Value]) -> Vec<StreamEvent> {
        payloads
            .iter()
            .filter_map(|p| parser.parse(&p.to_string()).unwrap())
            .collect()
    }

    #[test]
    fn test_line_buffer_reassembles_split_lines() {
        let mut buffer = SseLineBuffer::new();
        let text = "event: content_block_delta\ndata: {\"text\":\"富士\"}\n\n";
        let bytes = text.as_bytes();
        // Cut inside the multi-byte character
        let cut = text.find('富').unwrap() + 1;

        assert!(buffer.push(&bytes[..cut]).is_empty());
        let payloads = buffer.push(&bytes[cut..]);
        assert_eq!(payloads, vec!["{\"text\":\"富士\"}".to_string()]);
    }

    #[test]
    fn test_line_buffer_handles_crlf_and_multiple_events() {
        let mut buffer = SseLineBuffer::new();
        let payloads = buffer.push(b"data: {\"a\":1}\r\n\r\ndata:{\"b\":2}\n\n: comment\n");
        assert_eq!(payloads, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[test]
    fn test_text_and_tool_call_sequence() {
        let mut parser = AnthropicParser::new();
        let events = parse_all(
            &mut parser,
            &[
                json!({"type": "message_start", "message": {"id": "msg_1"}}),
                json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
                json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "検索します"}}),
                json!({"type": "content_block_stop", "index": 0}),
                json!({"type": "content_block_start", "index": 1, "content_block": {"type": "tool_use", "id": "toolu_1", "name": "search_knowledgebase", "input": {}}}),
                json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "{\"query\": "}}),
                json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "\"補助金\"}"}}),
                json!({"type": "content_block_stop", "index": 1}),
                json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}}),
                json!({"type": "message_stop"}),
            ],
        );

        assert_eq!(
            events,
            vec![
                StreamEvent::TextDelta("検索します".into()),
                StreamEvent::ToolCall(ToolCall {
                    id: "toolu_1".into(),
                    name: "search_knowledgebase".into(),
                    input: json!({"query": "補助金"}),
                }),
                StreamEvent::Stop {
                    reason: Some("tool_use".into())
                },
            ]
        );
    }

    #[test]
    fn test_tool_call_without_arguments_gets_empty_object() {
        let mut parser = AnthropicParser::new();
        let events = parse_all(
            &mut parser,
            &[
                json!({"type": "content_block_start", "index": 0, "content_block": {"type": "tool_use", "id": "t", "name": "n"}}),
                json!({"type": "content_block_stop", "index": 0}),
            ],
        );
        let StreamEvent::ToolCall(call) = &events[0] else {
            panic!("expected tool call");
        };
        assert_eq!(call.input, json!({}));
    }

    #[test]
    fn test_error_event_fails() {
        let mut parser = AnthropicParser::new();
        let err = parser
            .parse(&json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}).to_string())
            .unwrap_err();
        assert!(err.to_string().contains("overloaded_error"));
    }

    #[test]
    fn test_invalid_payload_fails() {
        let mut parser = AnthropicParser::new();
        assert!(parser.parse("{not json").is_err());
    }
}
