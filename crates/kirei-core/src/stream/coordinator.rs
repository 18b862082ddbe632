//! Streaming sessions
//!
//! A session runs one agent turn and forwards its trace to the transport:
//! raw item → normalize → encode → channel, one event at a time, in the order
//! the agent produced them.
//!
//! ```text
//! Started ──► Streaming ──► Completed
//!    │            ├───────► Cancelled   (receiver dropped / token fired)
//!    └────────────┴───────► Failed      (trace source error)
//! ```

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::encoder::StreamEncoder;
use super::normalizer::EventNormalizer;
use crate::agent::AgentRunner;
use crate::constants::server::STREAM_CHANNEL_BUFFER;

/// Lifecycle of a streaming session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Started,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Started => "started",
            SessionState::Streaming => "streaming",
            SessionState::Completed => "completed",
            SessionState::Cancelled => "cancelled",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One user turn to stream
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub thread_id: String,
    pub input: String,
}

impl TurnRequest {
    pub fn new(thread_id: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            input: input.into(),
        }
    }
}

/// A running session
pub struct StreamSession {
    pub thread_id: String,
    /// Encoded event blocks, ready for the transport
    pub body: ReceiverStream<Bytes>,
    /// Fire to abandon the session
    pub cancel: CancellationToken,
    /// Resolves to the terminal state
    pub outcome: JoinHandle<SessionState>,
}

/// Starts streaming sessions against a shared agent
#[derive(Clone)]
pub struct StreamCoordinator {
    agent: Arc<dyn AgentRunner>,
    normalizer: EventNormalizer,
    encoder: StreamEncoder,
    buffer: usize,
}

impl StreamCoordinator {
    pub fn new(agent: Arc<dyn AgentRunner>) -> Self {
        Self {
            agent,
            normalizer: EventNormalizer::new(),
            encoder: StreamEncoder::new(),
            buffer: STREAM_CHANNEL_BUFFER,
        }
    }

    /// Start a session on its own task
    pub fn spawn(&self, request: TurnRequest) -> StreamSession {
        let (tx, rx) = mpsc::channel(self.buffer.max(1));
        let cancel = CancellationToken::new();
        let thread_id = request.thread_id.clone();

        let outcome = tokio::spawn(self.clone().run(request, tx, cancel.clone()));

        StreamSession {
            thread_id,
            body: ReceiverStream::new(rx),
            cancel,
            outcome,
        }
    }

    async fn run(
        self,
        request: TurnRequest,
        tx: mpsc::Sender<Bytes>,
        cancel: CancellationToken,
    ) -> SessionState {
        let TurnRequest { thread_id, input } = request;
        let mut state = SessionState::Started;
        info!(thread_id = %thread_id, state = %state, "Stream session");

        let agent_cancel = cancel.child_token();
        let mut trace = self
            .agent
            .stream(input, thread_id.clone(), agent_cancel.clone());

        let terminal = 'session: loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break 'session SessionState::Cancelled,
                _ = tx.closed() => break 'session SessionState::Cancelled,
                next = trace.next() => next,
            };

            let item = match next {
                None => break 'session SessionState::Completed,
                Some(Err(e)) => {
                    error!(
                        thread_id = %thread_id,
                        error = %format!("{:#}", e),
                        "Trace source failed"
                    );
                    break 'session SessionState::Failed;
                }
                Some(Ok(item)) => item,
            };

            if state == SessionState::Started {
                state = SessionState::Streaming;
                debug!(thread_id = %thread_id, state = %state, "Stream session");
            }

            for event in self.normalizer.normalize(&item) {
                let block = self.encoder.encode(&event);
                let sent = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => false,
                    sent = tx.send(block) => sent.is_ok(),
                };
                if !sent {
                    break 'session SessionState::Cancelled;
                }
            }
        };

        // No further reads once the session is over
        drop(trace);
        if terminal != SessionState::Completed {
            agent_cancel.cancel();
        }
        info!(thread_id = %thread_id, state = %terminal, "Stream session");
        terminal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{RawStep, RawTraceItem, RawTraceStream};
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::time::Duration;

    type Script = fn(&str) -> Vec<Result<RawTraceItem>>;

    /// Replays a per-thread script; optionally never finishes afterwards.
    struct FakeAgent {
        script: Script,
        hang: bool,
        seen_cancel: parking_lot::Mutex<Option<CancellationToken>>,
    }

    impl FakeAgent {
        fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script,
                hang: false,
                seen_cancel: parking_lot::Mutex::new(None),
            })
        }

        fn hanging(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script,
                hang: true,
                seen_cancel: parking_lot::Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl AgentRunner for FakeAgent {
        async fn invoke(
            &self,
            _input: &str,
            _thread_id: &str,
            _cancel: CancellationToken,
        ) -> Result<String> {
            Ok(String::new())
        }

        fn stream(
            &self,
            _input: String,
            thread_id: String,
            cancel: CancellationToken,
        ) -> RawTraceStream {
            *self.seen_cancel.lock() = Some(cancel);
            let items = futures::stream::iter((self.script)(&thread_id)).then(|item| async move {
                tokio::task::yield_now().await;
                item
            });
            if self.hang {
                return Box::pin(items.chain(futures::stream::pending()));
            }
            Box::pin(items)
        }
    }

    fn token(text: &str) -> RawTraceItem {
        RawTraceItem::text_chunk(text)
    }

    fn tool_turn(thread_id: &str) -> Vec<Result<RawTraceItem>> {
        vec![
            Ok(RawTraceItem::step(
                "model",
                json!({"type": "ai", "content": "", "tool_calls": [
                    {"name": "search_knowledgebase", "args": {"query": thread_id}, "id": "c1"}
                ]}),
            )),
            Ok(RawTraceItem::step(
                "tools",
                json!({"type": "tool", "name": "search_knowledgebase",
                       "content": "{\"results\":[]}", "tool_call_id": "c1"}),
            )),
            Ok(token(&format!("{}-1", thread_id))),
            Ok(token(&format!("{}-2", thread_id))),
            Ok(token(&format!("{}-3", thread_id))),
        ]
    }

    fn parse_block(block: &Bytes) -> Value {
        let text = std::str::from_utf8(block).unwrap();
        let json = text
            .strip_prefix("data: ")
            .and_then(|t| t.strip_suffix("\n\n"))
            .unwrap();
        serde_json::from_str(json).unwrap()
    }

    fn assert_wire_shape(value: &Value) {
        let mut keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
        keys.sort_unstable();
        match value["type"].as_str().unwrap() {
            "tool_call" => {
                assert_eq!(keys, vec!["step", "tool_id", "tool_input", "tool_name", "type"]);
                assert!(value["tool_input"].is_object());
            }
            "tool_output" => {
                assert_eq!(keys, vec!["output", "step", "tool_call_id", "tool_name", "type"]);
                assert!(value["output"].is_string());
            }
            "llm_token" => {
                assert_eq!(keys, vec!["node", "token", "type"]);
                assert!(value["token"].is_string());
            }
            other => panic!("unexpected event type {}", other),
        }
    }

    #[tokio::test]
    async fn test_events_follow_trace_order() {
        let coordinator = StreamCoordinator::new(FakeAgent::new(tool_turn));
        let session = coordinator.spawn(TurnRequest::new("a", "質問"));

        let blocks: Vec<Bytes> = session.body.collect().await;
        let values: Vec<Value> = blocks.iter().map(parse_block).collect();
        let kinds: Vec<&str> = values.iter().map(|v| v["type"].as_str().unwrap()).collect();
        assert_eq!(
            kinds,
            vec!["tool_call", "tool_output", "llm_token", "llm_token", "llm_token"]
        );
        let tokens: Vec<&str> = values[2..].iter().map(|v| v["token"].as_str().unwrap()).collect();
        assert_eq!(tokens, vec!["a-1", "a-2", "a-3"]);

        for value in &values {
            assert_wire_shape(value);
        }
        assert_eq!(session.outcome.await.unwrap(), SessionState::Completed);
    }

    #[tokio::test]
    async fn test_concurrent_sessions_are_isolated() {
        let coordinator = StreamCoordinator::new(FakeAgent::new(tool_turn));
        let a = coordinator.spawn(TurnRequest::new("alpha", "q"));
        let b = coordinator.spawn(TurnRequest::new("beta", "q"));

        let (blocks_a, blocks_b): (Vec<Bytes>, Vec<Bytes>) =
            tokio::join!(a.body.collect(), b.body.collect());

        for (blocks, own, other) in [(&blocks_a, "alpha", "beta"), (&blocks_b, "beta", "alpha")] {
            assert_eq!(blocks.len(), 5);
            for block in blocks {
                let text = std::str::from_utf8(block).unwrap();
                assert!(!text.contains(other), "{} leaked into {}", other, own);
            }
            let value = parse_block(&blocks[0]);
            assert_eq!(value["tool_input"]["query"], own);
        }
    }

    #[tokio::test]
    async fn test_trace_failure_ends_stream() {
        fn failing(_: &str) -> Vec<Result<RawTraceItem>> {
            vec![Ok(token("partial")), Err(anyhow::anyhow!("model connection reset"))]
        }
        let coordinator = StreamCoordinator::new(FakeAgent::new(failing));
        let session = coordinator.spawn(TurnRequest::new("t", "q"));

        let blocks: Vec<Bytes> = session.body.collect().await;
        assert_eq!(blocks.len(), 1);
        assert_eq!(parse_block(&blocks[0])["token"], "partial");
        assert_eq!(session.outcome.await.unwrap(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_client_disconnect_cancels_session() {
        fn one_token(_: &str) -> Vec<Result<RawTraceItem>> {
            vec![Ok(token("first"))]
        }
        let agent = FakeAgent::hanging(one_token);
        let coordinator = StreamCoordinator::new(agent.clone());
        let mut session = coordinator.spawn(TurnRequest::new("t", "q"));

        let first = session.body.next().await.unwrap();
        assert_eq!(parse_block(&first)["token"], "first");
        drop(session.body);

        let state = tokio::time::timeout(Duration::from_secs(5), session.outcome)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state, SessionState::Cancelled);

        let agent_cancel = agent.seen_cancel.lock().clone().unwrap();
        assert!(agent_cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_external_cancel_stops_without_completion_event() {
        fn one_token(_: &str) -> Vec<Result<RawTraceItem>> {
            vec![Ok(token("first"))]
        }
        let coordinator = StreamCoordinator::new(FakeAgent::hanging(one_token));
        let mut session = coordinator.spawn(TurnRequest::new("t", "q"));

        session.body.next().await.unwrap();
        session.cancel.cancel();

        let rest: Vec<Bytes> = tokio::time::timeout(Duration::from_secs(5), session.body.collect())
            .await
            .unwrap();
        assert!(rest.is_empty());
        assert_eq!(session.outcome.await.unwrap(), SessionState::Cancelled);
    }

    #[tokio::test]
    async fn test_steps_without_events_produce_no_output() {
        fn quiet(_: &str) -> Vec<Result<RawTraceItem>> {
            vec![
                Ok(RawTraceItem::Updates(vec![RawStep::new("model", json!({"messages": []}))])),
                Ok(RawTraceItem::Message {
                    chunk: json!({"content": ""}),
                    metadata: json!({"node": "model"}),
                }),
            ]
        }
        let coordinator = StreamCoordinator::new(FakeAgent::new(quiet));
        let session = coordinator.spawn(TurnRequest::new("t", "q"));

        let blocks: Vec<Bytes> = session.body.collect().await;
        assert!(blocks.is_empty());
        assert_eq!(session.outcome.await.unwrap(), SessionState::Completed);
    }
}
