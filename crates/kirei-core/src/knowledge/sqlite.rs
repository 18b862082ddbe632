//! SQLite-backed knowledge store
//!
//! One table per collection plus a registry table recording dimensions.
//! Similarity search is a brute-force cosine scan over the collection.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::{
    blob_to_vec, cosine_similarity, vec_to_blob, CollectionHandle, CollectionSpec, KnowledgeStore,
    Passage, StoreError,
};
use crate::constants::knowledge::REGISTRY_TABLE;
use crate::storage::{Database, SharedDatabase};

/// Knowledge store over a single SQLite file.
///
/// The connection is opened on first use; collection handles are created at
/// most once per distinct [`CollectionSpec`] and shared afterwards.
pub struct SqliteKnowledgeStore {
    path: PathBuf,
    db: OnceCell<SharedDatabase>,
    handles: DashMap<CollectionSpec, Arc<OnceCell<CollectionHandle>>>,
}

impl SqliteKnowledgeStore {
    /// Store backed by the database file at `path` (opened lazily)
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            db: OnceCell::new(),
            handles: DashMap::new(),
        }
    }

    /// Store backed by a private in-memory database
    pub fn in_memory() -> Result<Self, StoreError> {
        let db = Database::in_memory().map_err(|e| StoreError::Unavailable(format!("{:#}", e)))?;
        Ok(Self {
            path: PathBuf::from(":memory:"),
            db: OnceCell::from(db.shared()),
            handles: DashMap::new(),
        })
    }

    async fn database(&self) -> Result<SharedDatabase, StoreError> {
        let db = self
            .db
            .get_or_try_init(|| async {
                let path = self.path.clone();
                let opened = tokio::task::spawn_blocking(move || Database::new(&path))
                    .await
                    .map_err(|e| StoreError::Internal(e.to_string()))?;
                opened
                    .map(Database::shared)
                    .map_err(|e| StoreError::Unavailable(format!("{:#}", e)))
            })
            .await?;
        Ok(db.clone())
    }

    async fn initialize(&self, spec: &CollectionSpec) -> Result<CollectionHandle, StoreError> {
        let table = spec.table_name()?;
        let db = self.database().await?;
        let spec = spec.clone();

        let handle = tokio::task::spawn_blocking(move || -> Result<CollectionHandle, StoreError> {
            let db = db.lock();
            let conn = db.conn();
            ensure_registry(conn)?;

            let existing: Option<i64> = conn
                .query_row(
                    &format!(
                        "SELECT dimension FROM {REGISTRY_TABLE} WHERE schema_name = ?1 AND name = ?2"
                    ),
                    params![spec.schema, spec.name],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(dimension) = existing {
                if dimension as usize != spec.dimension {
                    return Err(StoreError::DimensionMismatch {
                        expected: dimension as usize,
                        actual: spec.dimension,
                    });
                }
            }

            create_table(conn, &table)?;
            conn.execute(
                &format!(
                    "INSERT OR IGNORE INTO {REGISTRY_TABLE} (schema_name, name, dimension) VALUES (?1, ?2, ?3)"
                ),
                params![spec.schema, spec.name, spec.dimension as i64],
            )?;

            Ok(CollectionHandle::new(spec, table))
        })
        .await
        .map_err(|e| StoreError::Internal(e.to_string()))??;

        info!(collection = %handle.spec(), "Knowledge collection ready");
        Ok(handle)
    }
}

fn ensure_registry(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {REGISTRY_TABLE} (
                schema_name TEXT NOT NULL,
                name TEXT NOT NULL,
                dimension INTEGER NOT NULL,
                PRIMARY KEY (schema_name, name)
            )"
        ),
        [],
    )?;
    Ok(())
}

/// Create the collection table; an existing table counts as success.
fn create_table(conn: &Connection, table: &str) -> Result<(), StoreError> {
    let sql = format!(
        "CREATE TABLE \"{table}\" (
            id TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{{}}',
            embedding BLOB NOT NULL
        )"
    );
    match conn.execute(&sql, []) {
        Ok(_) => {
            info!(table, "Created collection table");
            Ok(())
        }
        Err(e) if is_already_exists(&e) => {
            debug!(table, "Collection table already exists, skipping creation");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn is_already_exists(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.contains("already exists"))
}

fn parse_metadata(raw: &str) -> Map<String, Value> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(_) | Err(_) => {
            warn!("Ignoring malformed passage metadata");
            Map::new()
        }
    }
}

#[async_trait]
impl KnowledgeStore for SqliteKnowledgeStore {
    async fn ensure_collection(
        &self,
        spec: &CollectionSpec,
    ) -> Result<CollectionHandle, StoreError> {
        // Guard dropped before awaiting
        let cell = self
            .handles
            .entry(spec.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let handle = cell.get_or_try_init(|| self.initialize(spec)).await?;
        Ok(handle.clone())
    }

    async fn similarity_search(
        &self,
        handle: &CollectionHandle,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<Passage>, StoreError> {
        if k == 0 {
            return Err(StoreError::InvalidTopK);
        }
        if query.len() != handle.dimension() {
            return Err(StoreError::DimensionMismatch {
                expected: handle.dimension(),
                actual: query.len(),
            });
        }

        let db = self.database().await?;
        let table = handle.table().to_string();
        let query = query.to_vec();

        tokio::task::spawn_blocking(move || -> Result<Vec<Passage>, StoreError> {
            let db = db.lock();
            let mut stmt = db.conn().prepare(&format!(
                "SELECT content, metadata, embedding FROM \"{table}\" ORDER BY rowid"
            ))?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                ))
            })?;

            let mut scored: Vec<(f32, String, String)> = Vec::new();
            for row in rows {
                let (content, metadata, blob) = row?;
                let vector = blob_to_vec(&blob);
                if vector.len() != query.len() {
                    continue;
                }
                let score = cosine_similarity(&query, &vector);
                if !score.is_finite() {
                    continue;
                }
                scored.push((score, content, metadata));
            }

            scored.sort_by(|a, b| b.0.total_cmp(&a.0));
            scored.truncate(k);

            Ok(scored
                .into_iter()
                .map(|(_, content, metadata)| Passage {
                    content,
                    metadata: parse_metadata(&metadata),
                })
                .collect())
        })
        .await
        .map_err(|e| StoreError::Internal(e.to_string()))?
    }

    async fn add_passages(
        &self,
        handle: &CollectionHandle,
        passages: Vec<(Passage, Vec<f32>)>,
    ) -> Result<usize, StoreError> {
        if let Some((_, vector)) = passages
            .iter()
            .find(|(_, vector)| vector.len() != handle.dimension())
        {
            return Err(StoreError::DimensionMismatch {
                expected: handle.dimension(),
                actual: vector.len(),
            });
        }
        if let Some(idx) = passages
            .iter()
            .position(|(_, vector)| vector.iter().any(|x| !x.is_finite()))
        {
            return Err(StoreError::NonFiniteVector(idx));
        }

        let db = self.database().await?;
        let table = handle.table().to_string();

        tokio::task::spawn_blocking(move || -> Result<usize, StoreError> {
            let db = db.lock();
            let tx = db.conn().unchecked_transaction()?;
            {
                let mut stmt = tx.prepare(&format!(
                    "INSERT INTO \"{table}\" (id, content, metadata, embedding) VALUES (?1, ?2, ?3, ?4)"
                ))?;
                for (passage, vector) in &passages {
                    let metadata = Value::Object(passage.metadata.clone()).to_string();
                    stmt.execute(params![
                        uuid::Uuid::new_v4().to_string(),
                        passage.content,
                        metadata,
                        vec_to_blob(vector),
                    ])?;
                }
            }
            tx.commit()?;
            Ok(passages.len())
        })
        .await
        .map_err(|e| StoreError::Internal(e.to_string()))?
    }
}
