//! Raw execution trace
//!
//! What an agent run produces before normalization. Payloads are loose JSON on
//! purpose: the normalizer is the only place that interprets them, and it has
//! to cope with shapes it has never seen.

use serde_json::{json, Value};

use super::types::ToolCall;
use crate::constants::ai::MODEL_NODE;

/// One item of an agent's raw trace
#[derive(Debug, Clone, PartialEq)]
pub enum RawTraceItem {
    /// Completed steps, keyed by the node that produced them
    Updates(Vec<RawStep>),
    /// An incremental generation fragment
    Message { chunk: Value, metadata: Value },
}

/// A completed step: `data` is expected to hold `{"messages": [...]}`
#[derive(Debug, Clone, PartialEq)]
pub struct RawStep {
    pub name: String,
    pub data: Value,
}

impl RawStep {
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// A step whose only message is `message`
    pub fn with_message(name: impl Into<String>, message: Value) -> Self {
        Self::new(name, json!({ "messages": [message] }))
    }
}

impl RawTraceItem {
    /// Single-step update
    pub fn step(name: impl Into<String>, message: Value) -> Self {
        RawTraceItem::Updates(vec![RawStep::with_message(name, message)])
    }

    /// Text fragment from the model node
    pub fn text_chunk(text: impl Into<String>) -> Self {
        RawTraceItem::Message {
            chunk: json!({
                "type": "ai",
                "content": [{ "type": "text", "text": text.into() }],
            }),
            metadata: json!({ "node": MODEL_NODE }),
        }
    }
}

/// Assistant message as it appears in a model step
pub fn ai_message(text: &str, tool_calls: &[ToolCall]) -> Value {
    let calls: Vec<Value> = tool_calls
        .iter()
        .map(|call| json!({ "id": call.id, "name": call.name, "args": call.input }))
        .collect();
    json!({ "type": "ai", "content": text, "tool_calls": calls })
}

/// Tool result message as it appears in a tools step
pub fn tool_message(name: &str, content: &str, tool_call_id: &str) -> Value {
    json!({
        "type": "tool",
        "name": name,
        "content": content,
        "tool_call_id": tool_call_id,
    })
}
