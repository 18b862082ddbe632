//! Raw trace → [`ExecutionEvent`]s
//!
//! Step updates yield tool events; message chunks yield generation tokens.
//! Nothing in here fails: shapes that don't fit are skipped or read as empty.

use serde_json::{Map, Value};
use tracing::trace;

use super::events::ExecutionEvent;
use crate::agent::{RawStep, RawTraceItem};

/// The raw content shapes a generation fragment can take.
///
/// Variants are listed in extraction precedence order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TokenShape<'a> {
    /// Non-empty list whose first element is an object
    ObjectList(&'a Map<String, Value>),
    /// Non-empty list whose first element is a string
    StringList(&'a str),
    Object(&'a Map<String, Value>),
    Text(&'a str),
    Unknown,
}

impl<'a> TokenShape<'a> {
    pub fn classify(content: &'a Value) -> Self {
        match content {
            Value::Array(items) => match items.first() {
                Some(Value::Object(first)) => TokenShape::ObjectList(first),
                Some(Value::String(first)) => TokenShape::StringList(first),
                _ => TokenShape::Unknown,
            },
            Value::Object(map) => TokenShape::Object(map),
            Value::String(text) => TokenShape::Text(text),
            _ => TokenShape::Unknown,
        }
    }

    pub fn text(self) -> &'a str {
        match self {
            TokenShape::ObjectList(map) | TokenShape::Object(map) => text_or_content(map),
            TokenShape::StringList(text) | TokenShape::Text(text) => text,
            TokenShape::Unknown => "",
        }
    }
}

/// `text`, else `content`, else empty; only non-empty strings count
fn text_or_content(map: &Map<String, Value>) -> &str {
    ["text", "content"]
        .iter()
        .filter_map(|key| map.get(*key).and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .unwrap_or("")
}

/// Text carried by a generation fragment's content; `""` for unknown shapes
pub fn extract_token(content: &Value) -> String {
    TokenShape::classify(content).text().to_string()
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("")
}

fn is_empty_content(content: &Value) -> bool {
    match content {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn is_tool_message(message: &Value) -> bool {
    str_field(message, "type") == "tool" || str_field(message, "role") == "tool"
}

fn tool_output(content: Option<&Value>) -> String {
    match content {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Stateless converter from raw trace items to execution events
#[derive(Debug, Default, Clone, Copy)]
pub struct EventNormalizer;

impl EventNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Events for one raw trace item, in production order
    pub fn normalize(&self, item: &RawTraceItem) -> Vec<ExecutionEvent> {
        match item {
            RawTraceItem::Updates(steps) => steps
                .iter()
                .flat_map(|step| self.normalize_step(step))
                .collect(),
            RawTraceItem::Message { chunk, metadata } => {
                self.normalize_message(chunk, metadata).into_iter().collect()
            }
        }
    }

    /// Tool events for a completed step, judged on its latest message
    pub fn normalize_step(&self, step: &RawStep) -> Vec<ExecutionEvent> {
        let Some(message) = step
            .data
            .get("messages")
            .and_then(Value::as_array)
            .and_then(|messages| messages.last())
        else {
            trace!(step = %step.name, "Step without messages");
            return Vec::new();
        };

        if let Some(calls) = message
            .get("tool_calls")
            .and_then(Value::as_array)
            .filter(|calls| !calls.is_empty())
        {
            return calls
                .iter()
                .filter(|call| call.is_object())
                .map(|call| ExecutionEvent::ToolCallRequested {
                    step: step.name.clone(),
                    tool_name: str_field(call, "name").to_string(),
                    tool_input: match call.get("args") {
                        None | Some(Value::Null) => Value::Object(Map::new()),
                        Some(args) => args.clone(),
                    },
                    tool_call_id: str_field(call, "id").to_string(),
                })
                .collect();
        }

        if is_tool_message(message) {
            return vec![ExecutionEvent::ToolCallCompleted {
                step: step.name.clone(),
                tool_name: str_field(message, "name").to_string(),
                output: tool_output(message.get("content")),
                tool_call_id: str_field(message, "tool_call_id").to_string(),
            }];
        }

        // Plain generation step: already delivered as tokens
        Vec::new()
    }

    /// Token event for a generation fragment; `None` when it carries no content
    pub fn normalize_message(&self, chunk: &Value, metadata: &Value) -> Option<ExecutionEvent> {
        let content = match chunk {
            Value::Object(map) => map.get("content"),
            other => Some(other),
        };
        let content = content.filter(|c| !is_empty_content(c))?;

        let node = metadata
            .get("node")
            .or_else(|| metadata.get("langgraph_node"))
            .and_then(Value::as_str)
            .unwrap_or("");

        Some(ExecutionEvent::GenerationToken {
            node: node.to_string(),
            text: extract_token(content),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(name: &str, data: Value) -> RawStep {
        RawStep::new(name, data)
    }

    #[test]
    fn test_token_extraction_table() {
        let cases = [
            (json!([{"text": "hi"}]), "hi"),
            (json!([{"content": "hi"}]), "hi"),
            (json!([{"text": "", "content": "hi"}]), "hi"),
            (json!([{"type": "text", "text": "hi"}, {"text": "ignored"}]), "hi"),
            (json!(["hi"]), "hi"),
            (json!(["hi", "there"]), "hi"),
            (json!({"text": "hi"}), "hi"),
            (json!({"content": "hi"}), "hi"),
            (json!("hi"), "hi"),
            (json!(42), ""),
            (json!({}), ""),
            (json!([]), ""),
            (json!(null), ""),
            (json!(true), ""),
            (json!([42]), ""),
            (json!([[1, 2]]), ""),
            (json!({"text": 5}), ""),
            (json!([{"tool_use": {}}]), ""),
        ];
        for (content, expected) in cases {
            assert_eq!(extract_token(&content), expected, "content: {}", content);
        }
    }

    #[test]
    fn test_classify_precedence() {
        let list = json!([{"text": "a"}]);
        assert!(matches!(TokenShape::classify(&list), TokenShape::ObjectList(_)));
        let strings = json!(["a"]);
        assert_eq!(TokenShape::classify(&strings), TokenShape::StringList("a"));
        assert_eq!(TokenShape::classify(&json!(1.5)), TokenShape::Unknown);
    }

    #[test]
    fn test_tool_calls_in_invocation_order() {
        let normalizer = EventNormalizer::new();
        let events = normalizer.normalize_step(&step(
            "model",
            json!({"messages": [
                {"type": "human", "content": "q"},
                {"type": "ai", "content": "", "tool_calls": [
                    {"name": "search_knowledgebase", "args": {"query": "a"}, "id": "c1"},
                    {"name": "search_knowledgebase", "args": {"query": "b"}, "id": "c2"}
                ]}
            ]}),
        ));

        assert_eq!(
            events,
            vec![
                ExecutionEvent::ToolCallRequested {
                    step: "model".into(),
                    tool_name: "search_knowledgebase".into(),
                    tool_input: json!({"query": "a"}),
                    tool_call_id: "c1".into(),
                },
                ExecutionEvent::ToolCallRequested {
                    step: "model".into(),
                    tool_name: "search_knowledgebase".into(),
                    tool_input: json!({"query": "b"}),
                    tool_call_id: "c2".into(),
                },
            ]
        );
    }

    #[test]
    fn test_tool_call_missing_fields_default() {
        let events = EventNormalizer::new().normalize_step(&step(
            "model",
            json!({"messages": [{"tool_calls": [{}, "garbage"]}]}),
        ));
        assert_eq!(
            events,
            vec![ExecutionEvent::ToolCallRequested {
                step: "model".into(),
                tool_name: String::new(),
                tool_input: json!({}),
                tool_call_id: String::new(),
            }]
        );
    }

    #[test]
    fn test_tool_result_message() {
        let normalizer = EventNormalizer::new();
        let events = normalizer.normalize_step(&step(
            "tools",
            json!({"messages": [{
                "type": "tool",
                "name": "search_knowledgebase",
                "content": "{\"results\":[]}",
                "tool_call_id": "c1"
            }]}),
        ));
        assert_eq!(
            events,
            vec![ExecutionEvent::ToolCallCompleted {
                step: "tools".into(),
                tool_name: "search_knowledgebase".into(),
                output: "{\"results\":[]}".into(),
                tool_call_id: "c1".into(),
            }]
        );

        // role-tagged, structured content rendered as JSON text
        let events = normalizer.normalize_step(&step(
            "tools",
            json!({"messages": [{"role": "tool", "content": {"results": []}}]}),
        ));
        let ExecutionEvent::ToolCallCompleted { output, tool_name, .. } = &events[0] else {
            panic!("expected tool output");
        };
        assert_eq!(output, "{\"results\":[]}");
        assert_eq!(tool_name, "");
    }

    #[test]
    fn test_plain_and_malformed_steps_emit_nothing() {
        let normalizer = EventNormalizer::new();
        for data in [
            json!({"messages": [{"type": "ai", "content": "final answer", "tool_calls": []}]}),
            json!({"messages": []}),
            json!({}),
            json!("not an object"),
            json!({"messages": "nope"}),
            json!({"messages": [7]}),
        ] {
            assert!(normalizer.normalize_step(&step("model", data)).is_empty());
        }
    }

    #[test]
    fn test_only_latest_message_is_inspected() {
        let events = EventNormalizer::new().normalize_step(&step(
            "model",
            json!({"messages": [
                {"type": "ai", "tool_calls": [{"name": "x", "args": {}, "id": "old"}]},
                {"type": "ai", "content": "done"}
            ]}),
        ));
        assert!(events.is_empty());
    }

    #[test]
    fn test_message_chunks() {
        let normalizer = EventNormalizer::new();

        let event = normalizer.normalize_message(
            &json!({"type": "ai", "content": [{"type": "text", "text": "こん"}]}),
            &json!({"node": "model"}),
        );
        assert_eq!(
            event,
            Some(ExecutionEvent::GenerationToken {
                node: "model".into(),
                text: "こん".into(),
            })
        );

        let event = normalizer.normalize_message(
            &json!({"content": "にちは"}),
            &json!({"langgraph_node": "agent"}),
        );
        assert_eq!(
            event,
            Some(ExecutionEvent::GenerationToken {
                node: "agent".into(),
                text: "にちは".into(),
            })
        );

        // Non-empty content of an unknown shape still produces one (empty) token
        let event = normalizer.normalize_message(&json!({"content": 42}), &json!({}));
        assert_eq!(
            event,
            Some(ExecutionEvent::GenerationToken {
                node: String::new(),
                text: String::new(),
            })
        );
    }

    #[test]
    fn test_empty_chunks_emit_nothing() {
        let normalizer = EventNormalizer::new();
        for chunk in [
            json!({"content": ""}),
            json!({"content": []}),
            json!({"content": {}}),
            json!({"content": null}),
            json!({"type": "ai"}),
            json!(""),
            json!(null),
        ] {
            assert_eq!(normalizer.normalize_message(&chunk, &json!({"node": "model"})), None);
        }
    }

    #[test]
    fn test_normalize_updates_with_several_steps() {
        let item = RawTraceItem::Updates(vec![
            step(
                "model",
                json!({"messages": [{"tool_calls": [{"name": "a", "args": {}, "id": "1"}]}]}),
            ),
            step(
                "tools",
                json!({"messages": [{"type": "tool", "name": "a", "content": "x", "tool_call_id": "1"}]}),
            ),
        ]);
        let kinds: Vec<&str> = EventNormalizer::new()
            .normalize(&item)
            .iter()
            .map(ExecutionEvent::kind)
            .collect();
        assert_eq!(kinds, vec!["tool_call", "tool_output"]);
    }
}
