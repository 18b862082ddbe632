//! Wire encoding: one `data: <json>\n\n` block per event

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::{json, Value};
use tracing::warn;

use super::events::ExecutionEvent;

const DATA_PREFIX: &[u8] = b"data: ";
const FRAME_END: &[u8] = b"\n\n";

/// Serializes execution events into self-delimited text blocks
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamEncoder;

impl StreamEncoder {
    pub fn new() -> Self {
        Self
    }

    /// Encode one event. Never fails: payloads that don't serialize are
    /// replaced by their string representation.
    pub fn encode(&self, event: &ExecutionEvent) -> Bytes {
        let payload = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                warn!(
                    kind = event.kind(),
                    error = %e,
                    "Event not serializable, sending text fallback"
                );
                fallback_payload(event).to_string()
            }
        };
        frame(payload.as_bytes())
    }
}

fn frame(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(DATA_PREFIX.len() + payload.len() + FRAME_END.len());
    buf.put_slice(DATA_PREFIX);
    buf.put_slice(payload);
    buf.put_slice(FRAME_END);
    buf.freeze()
}

/// Same wire shape with every free-form value flattened to text
fn fallback_payload(event: &ExecutionEvent) -> Value {
    match event {
        ExecutionEvent::ToolCallRequested {
            step,
            tool_name,
            tool_input,
            tool_call_id,
        } => json!({
            "type": event.kind(),
            "step": step,
            "tool_name": tool_name,
            "tool_input": tool_input.to_string(),
            "tool_id": tool_call_id,
        }),
        ExecutionEvent::ToolCallCompleted {
            step,
            tool_name,
            output,
            tool_call_id,
        } => json!({
            "type": event.kind(),
            "step": step,
            "tool_name": tool_name,
            "output": output,
            "tool_call_id": tool_call_id,
        }),
        ExecutionEvent::GenerationToken { node, text } => json!({
            "type": event.kind(),
            "node": node,
            "token": text,
        }),
    }
}
