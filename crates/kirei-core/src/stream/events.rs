//! Client-facing execution events

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Everything a client can observe during one agent turn.
///
/// Serialized with a `type` tag; the field names are the wire protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// The model asked for a tool to run
    #[serde(rename = "tool_call")]
    ToolCallRequested {
        step: String,
        tool_name: String,
        tool_input: Value,
        #[serde(rename = "tool_id")]
        tool_call_id: String,
    },
    /// A tool finished and its output went back to the model
    #[serde(rename = "tool_output")]
    ToolCallCompleted {
        step: String,
        tool_name: String,
        output: String,
        tool_call_id: String,
    },
    /// A fragment of generated text
    #[serde(rename = "llm_token")]
    GenerationToken {
        node: String,
        #[serde(rename = "token")]
        text: String,
    },
}

impl ExecutionEvent {
    /// Wire tag of the event
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionEvent::ToolCallRequested { .. } => "tool_call",
            ExecutionEvent::ToolCallCompleted { .. } => "tool_output",
            ExecutionEvent::GenerationToken { .. } => "llm_token",
        }
    }
}
