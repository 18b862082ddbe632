//! Passage ingestion from JSON Lines
//!
//! Each non-blank line is `{"content": string, "metadata"?: object}`.

use std::path::Path;

use anyhow::{Context, Result};

use kirei_core::embeddings::Embedder;
use kirei_core::knowledge::{CollectionSpec, KnowledgeStore, Passage};

/// Parse a JSON Lines document into passages.
pub fn parse_passages(text: &str) -> Result<Vec<Passage>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str::<Passage>(line)
                .with_context(|| format!("Invalid passage on line {}", idx + 1))
        })
        .collect()
}

/// Embed and store every passage in `passages`. Returns the number inserted.
pub async fn ingest_passages(
    store: &dyn KnowledgeStore,
    embedder: &dyn Embedder,
    spec: &CollectionSpec,
    passages: Vec<Passage>,
) -> Result<usize> {
    let handle = store.ensure_collection(spec).await?;

    let mut rows = Vec::with_capacity(passages.len());
    for (idx, passage) in passages.into_iter().enumerate() {
        let vector = embedder
            .embed_document(&passage.content)
            .await
            .with_context(|| format!("Failed to embed passage {}", idx + 1))?;
        rows.push((passage, vector));
    }

    let inserted = store.add_passages(&handle, rows).await?;
    tracing::info!(collection = %spec, inserted, "Ingested passages");
    Ok(inserted)
}

/// Read a JSON Lines file and ingest it into `spec`.
pub async fn ingest_file(
    store: &dyn KnowledgeStore,
    embedder: &dyn Embedder,
    spec: &CollectionSpec,
    path: &Path,
) -> Result<usize> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let passages = parse_passages(&text)?;
    tracing::info!(file = %path.display(), count = passages.len(), "Parsed passages");
    ingest_passages(store, embedder, spec, passages).await
}
