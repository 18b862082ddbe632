//! Knowledge collections
//!
//! A collection is a persistent set of passages with embedding vectors,
//! addressed by a [`CollectionSpec`] (name, dimension, schema). Stores hand
//! out a [`CollectionHandle`] from an idempotent `ensure_collection` and answer
//! top-k similarity queries against it.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`ensure_collection`](KnowledgeStore::ensure_collection) | Create-if-missing, memoized per triple |
//! | [`similarity_search`](KnowledgeStore::similarity_search) | Top-k passages by cosine similarity |
//! | [`add_passages`](KnowledgeStore::add_passages) | Insert passages with their vectors |

mod sqlite;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants;

pub use sqlite::SqliteKnowledgeStore;

/// A retrievable unit of text plus metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Passage {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Identity of a collection: fixed at creation time
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    pub dimension: usize,
    pub schema: String,
}

impl CollectionSpec {
    pub fn new(name: impl Into<String>, dimension: usize, schema: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dimension,
            schema: schema.into(),
        }
    }

    /// Backing table name (`<schema>__<name>`), validated as a bare identifier.
    pub fn table_name(&self) -> Result<String, StoreError> {
        for part in [&self.schema, &self.name] {
            let valid = !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_');
            if !valid {
                return Err(StoreError::InvalidIdentifier(part.clone()));
            }
        }
        Ok(format!("{}__{}", self.schema, self.name))
    }
}

impl Default for CollectionSpec {
    fn default() -> Self {
        Self::new(
            constants::knowledge::TABLE_NAME,
            constants::knowledge::VECTOR_SIZE,
            constants::knowledge::SCHEMA_NAME,
        )
    }
}

impl fmt::Display for CollectionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} ({}d)", self.schema, self.name, self.dimension)
    }
}

/// Shared handle to an initialized collection. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CollectionHandle {
    inner: Arc<HandleInner>,
}

#[derive(Debug)]
struct HandleInner {
    spec: CollectionSpec,
    table: String,
}

impl CollectionHandle {
    pub(crate) fn new(spec: CollectionSpec, table: String) -> Self {
        Self {
            inner: Arc::new(HandleInner { spec, table }),
        }
    }

    pub fn spec(&self) -> &CollectionSpec {
        &self.inner.spec
    }

    pub fn dimension(&self) -> usize {
        self.inner.spec.dimension
    }

    pub(crate) fn table(&self) -> &str {
        &self.inner.table
    }

    /// Whether two handles share the same underlying initialization
    pub fn same_instance(&self, other: &CollectionHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Knowledge store failures
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing engine could not be reached or opened
    #[error("knowledge store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid collection identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("passage {0} has a non-finite vector component")]
    NonFiniteVector(usize),

    #[error("top-k must be a positive integer")]
    InvalidTopK,

    #[error("knowledge store query failed: {0}")]
    Backend(#[from] rusqlite::Error),

    #[error("knowledge store task failed: {0}")]
    Internal(String),
}

/// Storage backend for passage collections.
///
/// Implementations must be `Send + Sync`; one instance is shared by every
/// session for the lifetime of the process.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Create the collection if needed and return a handle to it.
    ///
    /// Calling this repeatedly (or concurrently) with the same spec never
    /// fails because the collection already exists.
    async fn ensure_collection(&self, spec: &CollectionSpec)
        -> Result<CollectionHandle, StoreError>;

    /// Return at most `k` passages, closest to `query` first.
    async fn similarity_search(
        &self,
        handle: &CollectionHandle,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<Passage>, StoreError>;

    /// Insert passages with their vectors. Returns the number inserted.
    async fn add_passages(
        &self,
        handle: &CollectionHandle,
        passages: Vec<(Passage, Vec<f32>)>,
    ) -> Result<usize, StoreError>;
}

/// Encode a vector as little-endian f32 bytes
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian f32 bytes back into a vector
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity; `0.0` for empty, mismatched, or zero-norm vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name() {
        let spec = CollectionSpec::default();
        assert_eq!(spec.table_name().unwrap(), "public__jp_ai_bot");
    }

    #[test]
    fn test_table_name_rejects_injection() {
        let spec = CollectionSpec::new("docs; DROP TABLE x", 3, "public");
        assert!(matches!(
            spec.table_name(),
            Err(StoreError::InvalidIdentifier(_))
        ));
        let spec = CollectionSpec::new("docs", 3, "");
        assert!(spec.table_name().is_err());
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &[0.0, 1.0, 0.0]).abs() < 1e-6);
        assert!((cosine_similarity(&a, &[-1.0, 0.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_blob_decoding_ignores_trailing_bytes() {
        let mut blob = vec_to_blob(&[0.5, -2.0]);
        blob.push(7);
        assert_eq!(blob_to_vec(&blob), vec![0.5, -2.0]);
    }

    #[test]
    fn test_passage_serializes_content_and_metadata() {
        let passage = Passage::new("Mount Fuji").with_metadata("page", serde_json::json!(3));
        let value = serde_json::to_value(&passage).unwrap();
        assert_eq!(value["content"], "Mount Fuji");
        assert_eq!(value["metadata"]["page"], 3);
    }
}
