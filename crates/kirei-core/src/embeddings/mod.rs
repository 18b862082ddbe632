//! Embedding collaborator
//!
//! Turns text into a fixed-length vector. The retriever and the ingest command
//! depend only on the [`Embedder`] trait; [`GeminiEmbedder`] is the concrete
//! client used by the server.

mod gemini;

use anyhow::Result;
use async_trait::async_trait;

pub use gemini::GeminiEmbedder;

/// Text embedding provider
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier (e.g. `"gemini-embedding-001"`)
    fn model_name(&self) -> &str;

    /// Length of every vector this embedder returns
    fn dimension(&self) -> usize;

    /// Embed a search query
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a passage for storage. Defaults to the query embedding.
    async fn embed_document(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_query(text).await
    }
}
