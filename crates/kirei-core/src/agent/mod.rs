//! Agent loop collaborator
//!
//! - [`AgentRunner`] - what the server needs from an agent: a full turn, or a raw trace stream
//! - [`ToolLoopAgent`] - model ⇄ tool loop over a [`ChatModel`] and a [`ToolRegistry`](crate::tools::ToolRegistry)
//! - [`AnthropicClient`] - streaming Messages API implementation of [`ChatModel`]
//! - [`RawTraceItem`] - loosely-typed trace consumed by the stream normalizer

mod anthropic;
pub mod prompt;
pub mod sse;
mod tool_loop;
pub mod trace;
pub mod types;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::tools::ToolDefinition;

pub use anthropic::AnthropicClient;
pub use tool_loop::ToolLoopAgent;
pub use trace::{RawStep, RawTraceItem};
pub use types::{Content, ModelMessage, Role, StreamEvent, ToolCall};

/// Raw trace of one agent turn. An `Err` item means the source failed; the
/// stream ends after it.
pub type RawTraceStream = BoxStream<'static, Result<RawTraceItem>>;

/// Events of one streamed model step
pub type ModelEventStream = BoxStream<'static, Result<StreamEvent>>;

/// A language model that can stream one step of a conversation
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn stream_step(
        &self,
        system: &str,
        messages: &[ModelMessage],
        tools: &[ToolDefinition],
    ) -> Result<ModelEventStream>;
}

/// Runs agent turns for a conversation thread
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Run a full turn and return the final assistant text
    async fn invoke(&self, input: &str, thread_id: &str, cancel: CancellationToken)
        -> Result<String>;

    /// Start a turn and observe it as a raw trace.
    ///
    /// Dropping the returned stream or firing `cancel` stops the turn.
    fn stream(&self, input: String, thread_id: String, cancel: CancellationToken)
        -> RawTraceStream;
}
