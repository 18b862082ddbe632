//! Tool registry for managing available tools

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::Cancelled;

/// Tool execution result
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub output: String,
    pub is_error: bool,
}

impl ToolResult {
    /// Create a success result
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: false,
        }
    }

    /// Create a success result from a JSON value
    pub fn json(value: &Value) -> Self {
        Self::success(value.to_string())
    }

    /// Create a structured error with explicit code.
    pub fn error_with_code(code: &str, msg: impl std::fmt::Display) -> Self {
        Self {
            output: serde_json::json!({
                "error": {
                    "code": code,
                    "message": msg.to_string()
                }
            })
            .to_string(),
            is_error: true,
        }
    }

    /// Create an invalid-parameters error.
    pub fn invalid_parameters(msg: impl std::fmt::Display) -> Self {
        Self::error_with_code("invalid_parameters", msg)
    }
}

/// Parse tool parameters, returning a ToolResult error on failure
pub fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, ToolResult> {
    serde_json::from_value(params)
        .map_err(|e| ToolResult::invalid_parameters(format!("Invalid parameters: {}", e)))
}

/// Context for tool execution
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Conversation the call belongs to
    pub thread_id: String,
    /// Fired when the session is abandoned
    pub cancel: CancellationToken,
    /// Optional per-call timeout; calls are unbounded when unset
    pub timeout: Option<Duration>,
}

impl ToolContext {
    pub fn new(thread_id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            thread_id: thread_id.into(),
            cancel,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Name, description and input schema as advertised to the model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Trait for tool implementations
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (id)
    fn name(&self) -> &str;

    /// Tool description for AI
    fn description(&self) -> &str;

    /// JSON schema for parameters
    fn parameters_schema(&self) -> Value;

    /// Execute the tool. Failures are reported inside the [`ToolResult`];
    /// `Err` is reserved for cancellation.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolResult, Cancelled>;
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool '{0}'")]
    NotFound(String),
    #[error("tool call cancelled")]
    Cancelled,
}

impl From<Cancelled> for ToolError {
    fn from(_: Cancelled) -> Self {
        ToolError::Cancelled
    }
}

/// Registry mapping tool names to implementations
pub struct ToolRegistry {
    tools: Arc<RwLock<HashMap<String, Arc<dyn Tool>>>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a tool
    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        let mut tools = self.tools.write().await;
        if tools.insert(name.clone(), tool).is_some() {
            tracing::debug!(tool = %name, "Replaced existing tool registration");
        }
    }

    /// Get a tool by name
    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let tools = self.tools.read().await;
        tools.get(name).cloned()
    }

    /// All tools as model-facing definitions, sorted by name
    pub async fn definitions(&self) -> Vec<ToolDefinition> {
        let tools = self.tools.read().await;
        let mut defs: Vec<ToolDefinition> = tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.parameters_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute a tool by name, honoring the context's cancellation and timeout
    pub async fn execute(
        &self,
        name: &str,
        params: Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let tool = self
            .get(name)
            .await
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tracing::debug!(tool = name, thread_id = %ctx.thread_id, "Executing tool");
        let start = Instant::now();

        let run = async {
            match ctx.timeout {
                Some(timeout) => match tokio::time::timeout(timeout, tool.execute(params, ctx)).await
                {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::warn!(
                            tool = name,
                            timeout_secs = timeout.as_secs(),
                            "Tool execution timed out"
                        );
                        Ok(ToolResult::error_with_code(
                            "timeout",
                            format!(
                                "Tool '{}' timed out after {} seconds",
                                name,
                                timeout.as_secs()
                            ),
                        ))
                    }
                },
                None => tool.execute(params, ctx).await,
            }
        };

        let result = tokio::select! {
            _ = ctx.cancel.cancelled() => Err(ToolError::Cancelled),
            result = run => result.map_err(ToolError::from),
        };

        tracing::debug!(
            tool = name,
            elapsed_ms = start.elapsed().as_millis() as u64,
            ok = result.as_ref().map(|r| !r.is_error).unwrap_or(false),
            "Tool finished"
        );
        result
    }
}
