//! Knowledge retrieval
//!
//! Turns a natural-language query into the closest passages of the configured
//! collection: ensure the collection, embed the query, run a top-k search.
//! Failures come back as data ([`RetrievalOutput::Error`]) so the agent loop
//! can keep going; cancellation is reported separately as [`Cancelled`].

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::constants;
use crate::embeddings::Embedder;
use crate::error::Cancelled;
use crate::knowledge::{CollectionSpec, KnowledgeStore, Passage};
use crate::tools::{parse_params, Tool, ToolContext, ToolResult};

/// Name the retrieval tool is registered under
pub const SEARCH_TOOL_NAME: &str = "search_knowledgebase";

/// Outcome of one retrieval
#[derive(Debug, Clone, PartialEq)]
pub enum RetrievalOutput {
    /// Closest passages first; empty when nothing matched
    Results(Vec<Passage>),
    Error { message: String },
}

impl RetrievalOutput {
    pub fn is_error(&self) -> bool {
        matches!(self, RetrievalOutput::Error { .. })
    }

    /// Tool-facing JSON: `{"results": [...]}` or `{"error": "..."}`
    pub fn to_json(&self) -> Value {
        match self {
            RetrievalOutput::Results(passages) => json!({ "results": passages }),
            RetrievalOutput::Error { message } => json!({ "error": message }),
        }
    }
}

/// Query → embedding → top-k passages over one fixed collection
pub struct Retriever {
    store: Arc<dyn KnowledgeStore>,
    embedder: Arc<dyn Embedder>,
    spec: CollectionSpec,
    top_k: usize,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        embedder: Arc<dyn Embedder>,
        spec: CollectionSpec,
    ) -> Self {
        Self {
            store,
            embedder,
            spec,
            top_k: constants::knowledge::TOP_K,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Retrieve passages for `query`.
    ///
    /// Returns `Err(Cancelled)` as soon as `cancel` fires, wherever the
    /// retrieval happens to be.
    pub async fn retrieve(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<RetrievalOutput, Cancelled> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(collection = %self.spec, "Retrieval cancelled");
                Err(Cancelled)
            }
            result = self.search(query) => Ok(match result {
                Ok(passages) => {
                    debug!(collection = %self.spec, count = passages.len(), "Retrieval finished");
                    RetrievalOutput::Results(passages)
                }
                Err(e) => {
                    warn!(collection = %self.spec, error = %format!("{:#}", e), "Retrieval failed");
                    RetrievalOutput::Error {
                        message: format!("{:#}", e),
                    }
                }
            }),
        }
    }

    async fn search(&self, query: &str) -> anyhow::Result<Vec<Passage>> {
        let handle = self.store.ensure_collection(&self.spec).await?;
        let vector = self
            .embedder
            .embed_query(query)
            .await
            .context("Failed to embed query")?;
        let passages = self
            .store
            .similarity_search(&handle, &vector, self.top_k)
            .await?;
        Ok(passages)
    }
}

/// `search_knowledgebase` tool backed by a [`Retriever`]
pub struct KnowledgeSearchTool {
    retriever: Arc<Retriever>,
}

impl KnowledgeSearchTool {
    pub fn new(retriever: Arc<Retriever>) -> Self {
        Self { retriever }
    }
}

#[derive(Deserialize)]
struct SearchParams {
    query: String,
}

#[async_trait]
impl Tool for KnowledgeSearchTool {
    fn name(&self) -> &str {
        SEARCH_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Search the knowledgebase for relevant information."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to look up in the knowledgebase"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolResult, Cancelled> {
        let params: SearchParams = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return Ok(e),
        };

        let output = self.retriever.retrieve(&params.query, &ctx.cancel).await?;
        Ok(ToolResult {
            output: output.to_json().to_string(),
            is_error: output.is_error(),
        })
    }
}
