//! Anthropic Messages API client (streaming)

use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use super::sse::{AnthropicParser, SseLineBuffer};
use super::types::{ModelMessage, StreamEvent};
use super::{ChatModel, ModelEventStream};
use crate::config::KireiConfig;
use crate::constants::ai::ANTHROPIC_VERSION;
use crate::constants::server::STREAM_CHANNEL_BUFFER;
use crate::tools::ToolDefinition;

/// Streaming client for `POST /v1/messages`
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: Option<String>,
    api_url: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
}

impl AnthropicClient {
    pub fn from_config(config: &KireiConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: config.anthropic_api_key.clone(),
            api_url: config.api_url.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn request_body(
        &self,
        system: &str,
        messages: &[ModelMessage],
        tools: &[ToolDefinition],
    ) -> Value {
        let mut body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "messages": messages,
            "stream": true,
        });
        if !system.is_empty() {
            body["system"] = json!(system);
        }
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }
        body
    }
}

async fn ensure_success(
    response: reqwest::Response,
    call_start: Instant,
) -> Result<reqwest::Response> {
    let status = response.status();
    info!("Model response: {} in {:?}", status, call_start.elapsed());

    if status.is_success() {
        return Ok(response);
    }

    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    error!("Model API error: {} - {}", status, error_text);
    Err(anyhow::anyhow!("Model API error: {} - {}", status, error_text))
}

/// Read the response body on a separate task, forwarding parsed events.
///
/// The task stops when the body ends, on the first error (which is forwarded),
/// or as soon as the receiver is dropped.
fn spawn_sse_stream_task<S>(stream: S, tx: mpsc::Sender<Result<StreamEvent>>)
where
    S: futures::Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::pin!(stream);
        let mut lines = SseLineBuffer::new();
        let mut parser = AnthropicParser::new();
        let mut chunk_count: u64 = 0;

        while let Some(chunk) = stream.next().await {
            chunk_count += 1;
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!("Model stream read error at chunk #{}: {}", chunk_count, e);
                    let _ = tx
                        .send(Err(anyhow::anyhow!("Model stream read error: {}", e)))
                        .await;
                    return;
                }
            };

            for data in lines.push(&bytes) {
                match parser.parse(&data) {
                    Ok(Some(event)) => {
                        if tx.send(Ok(event)).await.is_err() {
                            debug!("Model stream receiver dropped");
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!("Model stream chunk #{} parse error: {}", chunk_count, e);
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
            }
        }
        debug!("Model stream ended after {} chunks", chunk_count);
    });
}

#[async_trait]
impl ChatModel for AnthropicClient {
    async fn stream_step(
        &self,
        system: &str,
        messages: &[ModelMessage],
        tools: &[ToolDefinition],
    ) -> Result<ModelEventStream> {
        let Some(api_key) = self.api_key.as_deref() else {
            anyhow::bail!("ANTHROPIC_API_KEY is not configured");
        };

        let body = self.request_body(system, messages, tools);
        debug!(
            model = %self.model,
            messages = messages.len(),
            tools = tools.len(),
            "Calling model"
        );
        let call_start = Instant::now();

        let response = self
            .http
            .post(&self.api_url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .context("Model request failed")?;
        let response = ensure_success(response, call_start).await?;

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_BUFFER);
        spawn_sse_stream_task(response.bytes_stream(), tx);
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::types::Content;

    #[test]
    fn test_request_body() {
        let client = AnthropicClient::from_config(&KireiConfig::default());
        let tools = vec![ToolDefinition {
            name: "search_knowledgebase".into(),
            description: "Search".into(),
            input_schema: json!({"type": "object"}),
        }];
        let messages = [ModelMessage::user_text("こんにちは")];
        let body = client.request_body("prompt", &messages, &tools);

        assert_eq!(body["model"], "claude-haiku-4-5-20251001");
        assert_eq!(body["stream"], true);
        assert_eq!(body["system"], "prompt");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"][0]["text"], "こんにちは");
        assert_eq!(body["tools"][0]["name"], "search_knowledgebase");
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
        assert!((body["temperature"].as_f64().unwrap() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_request_body_omits_empty_tools() {
        let client = AnthropicClient::from_config(&KireiConfig::default());
        let messages = vec![ModelMessage {
            role: crate::agent::types::Role::User,
            content: vec![Content::Text { text: "hi".into() }],
        }];
        let body = client.request_body("", &messages, &[]);
        assert!(body.get("tools").is_none());
        assert!(body.get("system").is_none());
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_request() {
        let client = AnthropicClient::from_config(&KireiConfig::default());
        assert!(!client.has_api_key());
        let err = client
            .stream_step("", &[ModelMessage::user_text("hi")], &[])
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("ANTHROPIC_API_KEY"));
    }
}
