//! Model ⇄ tool loop
//!
//! Each iteration streams one model step. Text deltas are emitted as they
//! arrive; the finished step is emitted as a `model` update. Requested tools
//! run through the registry in call order, each result emitted as a `tools`
//! update, and the loop goes around again. A step without tool calls ends the
//! turn.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::prompt::SYSTEM_PROMPT;
use super::trace::{ai_message, tool_message, RawTraceItem};
use super::types::{Content, ModelMessage, Role, StreamEvent, ToolCall};
use super::{AgentRunner, ChatModel, RawTraceStream};
use crate::constants::ai::{MAX_ITERATIONS, MODEL_NODE, TOOLS_NODE};
use crate::constants::server::STREAM_CHANNEL_BUFFER;
use crate::error::Cancelled;
use crate::tools::{ToolContext, ToolDefinition, ToolError, ToolRegistry, ToolResult};

type TraceSender = mpsc::Sender<Result<RawTraceItem>>;

/// Agent that alternates model steps and tool calls until the model answers.
///
/// Conversation history is kept in memory per thread id and only updated
/// once a turn completes.
#[derive(Clone)]
pub struct ToolLoopAgent {
    model: Arc<dyn ChatModel>,
    tools: Arc<ToolRegistry>,
    system_prompt: Arc<str>,
    max_iterations: usize,
    history: Arc<DashMap<String, Vec<ModelMessage>>>,
}

#[derive(Default)]
struct ModelStep {
    text: String,
    tool_calls: Vec<ToolCall>,
    stop_reason: Option<String>,
}

impl ModelStep {
    fn into_message(self) -> Option<ModelMessage> {
        let mut content = Vec::new();
        if !self.text.is_empty() {
            content.push(Content::Text { text: self.text });
        }
        content.extend(self.tool_calls.into_iter().map(|call| Content::ToolUse {
            id: call.id,
            name: call.name,
            input: call.input,
        }));
        if content.is_empty() {
            return None;
        }
        Some(ModelMessage {
            role: Role::Assistant,
            content,
        })
    }
}

async fn emit(sink: Option<&TraceSender>, item: RawTraceItem) -> Result<()> {
    match sink {
        Some(tx) => tx
            .send(Ok(item))
            .await
            .map_err(|_| anyhow::Error::new(Cancelled)),
        None => Ok(()),
    }
}

impl ToolLoopAgent {
    pub fn new(model: Arc<dyn ChatModel>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            model,
            tools,
            system_prompt: Arc::from(SYSTEM_PROMPT),
            max_iterations: MAX_ITERATIONS,
            history: Arc::new(DashMap::new()),
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Number of stored messages for a thread
    pub fn history_len(&self, thread_id: &str) -> usize {
        self.history.get(thread_id).map(|h| h.len()).unwrap_or(0)
    }

    async fn run_turn(
        &self,
        input: &str,
        thread_id: &str,
        cancel: &CancellationToken,
        sink: Option<&TraceSender>,
    ) -> Result<String> {
        let mut messages = self
            .history
            .get(thread_id)
            .map(|h| h.value().clone())
            .unwrap_or_default();
        messages.push(ModelMessage::user_text(input));

        let tools = self.tools.definitions().await;
        let ctx = ToolContext::new(thread_id, cancel.clone());

        for iteration in 0..self.max_iterations {
            let step = self.model_step(&messages, &tools, sink).await?;
            debug!(
                thread_id = %thread_id,
                iteration,
                tool_calls = step.tool_calls.len(),
                stop_reason = ?step.stop_reason,
                "Model step finished"
            );

            emit(
                sink,
                RawTraceItem::step(MODEL_NODE, ai_message(&step.text, &step.tool_calls)),
            )
            .await?;

            let text = step.text.clone();
            let calls = step.tool_calls.clone();
            if let Some(message) = step.into_message() {
                messages.push(message);
            }

            if calls.is_empty() {
                self.history.insert(thread_id.to_string(), messages);
                info!(thread_id = %thread_id, iterations = iteration + 1, "Agent turn complete");
                return Ok(text);
            }

            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                let result = self.run_tool(&call, &ctx).await?;
                emit(
                    sink,
                    RawTraceItem::step(
                        TOOLS_NODE,
                        tool_message(&call.name, &result.output, &call.id),
                    ),
                )
                .await?;
                results.push(Content::ToolResult {
                    tool_use_id: call.id,
                    content: result.output,
                    is_error: result.is_error,
                });
            }
            messages.push(ModelMessage {
                role: Role::User,
                content: results,
            });
        }

        warn!(thread_id = %thread_id, max = self.max_iterations, "Agent hit iteration limit");
        anyhow::bail!(
            "Agent stopped after {} iterations without a final answer",
            self.max_iterations
        )
    }

    async fn model_step(
        &self,
        messages: &[ModelMessage],
        tools: &[ToolDefinition],
        sink: Option<&TraceSender>,
    ) -> Result<ModelStep> {
        let mut events = self
            .model
            .stream_step(&self.system_prompt, messages, tools)
            .await?;
        let mut step = ModelStep::default();

        while let Some(event) = events.next().await {
            match event? {
                StreamEvent::TextDelta(text) => {
                    if text.is_empty() {
                        continue;
                    }
                    step.text.push_str(&text);
                    emit(sink, RawTraceItem::text_chunk(text)).await?;
                }
                StreamEvent::ToolCall(call) => step.tool_calls.push(call),
                StreamEvent::Stop { reason } => {
                    step.stop_reason = reason;
                    return Ok(step);
                }
            }
        }
        anyhow::bail!("Model stream ended before the message was complete")
    }

    async fn run_tool(&self, call: &ToolCall, ctx: &ToolContext) -> Result<ToolResult> {
        match self
            .tools
            .execute(&call.name, call.input.clone(), ctx)
            .await
        {
            Ok(result) => Ok(result),
            Err(ToolError::NotFound(name)) => {
                warn!(tool = %name, "Model requested unknown tool");
                Ok(ToolResult::error_with_code(
                    "unknown_tool",
                    format!("Unknown tool: {}", name),
                ))
            }
            Err(ToolError::Cancelled) => Err(Cancelled.into()),
        }
    }
}

#[async_trait]
impl AgentRunner for ToolLoopAgent {
    async fn invoke(
        &self,
        input: &str,
        thread_id: &str,
        cancel: CancellationToken,
    ) -> Result<String> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Cancelled.into()),
            result = self.run_turn(input, thread_id, &cancel, None) => result,
        }
    }

    fn stream(
        &self,
        input: String,
        thread_id: String,
        cancel: CancellationToken,
    ) -> RawTraceStream {
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_BUFFER);
        let agent = self.clone();

        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(thread_id = %thread_id, "Agent turn cancelled");
                    return;
                }
                _ = tx.closed() => {
                    debug!(thread_id = %thread_id, "Trace receiver dropped, abandoning turn");
                    return;
                }
                result = agent.run_turn(&input, &thread_id, &cancel, Some(&tx)) => result,
            };

            if let Err(e) = result {
                if e.is::<Cancelled>() {
                    debug!(thread_id = %thread_id, "Agent turn stopped");
                    return;
                }
                let _ = tx.send(Err(e)).await;
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }
}
