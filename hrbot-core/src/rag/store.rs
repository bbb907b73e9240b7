//! Vector store for policy chunks.
//!
//! `SqliteVectorStore` keeps one row per chunk with its embedding as a
//! little-endian `f32` blob. Records are insert-only: an id that is already
//! present is left untouched. Similarity search is brute-force cosine over the
//! rows of the requested sources, which is enough for a handful of policy
//! documents.

use async_trait::async_trait;
use rusqlite::{Connection, params, params_from_iter};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::StoreError;

/// A chunk with its embedding, ready to store.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    pub source: String,
    pub text: String,
}

/// A stored passage returned by a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPassage {
    pub id: String,
    pub text: String,
    pub source: String,
    /// Cosine distance to the query (lower is closer).
    pub score: f32,
}

/// Restricts a query to some documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceFilter {
    Any,
    In(HashSet<String>),
}

impl SourceFilter {
    pub fn only(source: impl Into<String>) -> Self {
        SourceFilter::In(HashSet::from([source.into()]))
    }
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Ids of every stored record.
    async fn exists_ids(&self) -> Result<HashSet<String>, StoreError>;

    /// Insert records whose id is not yet stored. Returns how many were inserted.
    async fn upsert(&self, records: Vec<EmbeddingRecord>) -> Result<usize, StoreError>;

    /// Up to `k` passages ordered by ascending distance, ties by insertion order.
    async fn query(
        &self,
        embedding: &[f32],
        filter: SourceFilter,
        k: usize,
    ) -> Result<Vec<ScoredPassage>, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;

    /// Distinct document names present in the store.
    async fn sources(&self) -> Result<Vec<String>, StoreError>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS chunks (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    collection TEXT NOT NULL,
    id         TEXT NOT NULL,
    source     TEXT NOT NULL,
    document   TEXT NOT NULL,
    embedding  BLOB NOT NULL,
    UNIQUE (collection, id)
);
CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks (collection, source);
";

/// SQLite-backed vector store. Each call opens its own connection on the
/// blocking pool.
#[derive(Debug, Clone)]
pub struct SqliteVectorStore {
    path: PathBuf,
    collection: String,
}

impl SqliteVectorStore {
    /// Open (creating if needed) the store file and its schema.
    pub async fn open(path: impl AsRef<Path>, collection: &str) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Open {
                    path: path.clone(),
                    message: e.to_string(),
                })?;
        }
        let store = Self {
            path,
            collection: collection.to_string(),
        };
        store
            .with_connection(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Delete every record of this collection.
    pub async fn drop_collection(&self) -> Result<usize, StoreError> {
        let collection = self.collection.clone();
        self.with_connection(move |conn| {
            Ok(conn.execute("DELETE FROM chunks WHERE collection = ?1", params![collection])?)
        })
        .await
    }

    async fn with_connection<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = open_connection(&path)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task {
            message: e.to_string(),
        })?
    }
}

pub(crate) fn open_connection(path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(path).map_err(|e| StoreError::Open {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn exists_ids(&self) -> Result<HashSet<String>, StoreError> {
        let collection = self.collection.clone();
        self.with_connection(move |conn| {
            let mut stmt = conn.prepare("SELECT id FROM chunks WHERE collection = ?1")?;
            let ids = stmt
                .query_map(params![collection], |row| row.get::<_, String>(0))?
                .collect::<Result<HashSet<_>, _>>()?;
            Ok(ids)
        })
        .await
    }

    async fn upsert(&self, records: Vec<EmbeddingRecord>) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        let collection = self.collection.clone();
        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            let mut inserted = 0;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO chunks (collection, id, source, document, embedding)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for record in &records {
                    inserted += stmt.execute(params![
                        collection,
                        record.id,
                        record.source,
                        record.text,
                        encode_embedding(&record.embedding),
                    ])?;
                }
            }
            tx.commit()?;
            Ok(inserted)
        })
        .await
    }

    async fn query(
        &self,
        embedding: &[f32],
        filter: SourceFilter,
        k: usize,
    ) -> Result<Vec<ScoredPassage>, StoreError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let sources: Vec<String> = match filter {
            SourceFilter::Any => Vec::new(),
            SourceFilter::In(set) if set.is_empty() => return Ok(Vec::new()),
            SourceFilter::In(set) => {
                let mut v: Vec<String> = set.into_iter().collect();
                v.sort();
                v
            }
        };
        let query = embedding.to_vec();
        let collection = self.collection.clone();

        self.with_connection(move |conn| {
            let mut sql = String::from(
                "SELECT seq, id, source, document, embedding FROM chunks WHERE collection = ?1",
            );
            if !sources.is_empty() {
                let placeholders: Vec<String> =
                    (0..sources.len()).map(|i| format!("?{}", i + 2)).collect();
                sql.push_str(&format!(" AND source IN ({})", placeholders.join(", ")));
            }

            let mut bind = Vec::with_capacity(sources.len() + 1);
            bind.push(collection);
            bind.extend(sources);

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(bind.iter()), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Vec<u8>>(4)?,
                ))
            })?;

            let mut scored = Vec::new();
            for row in rows {
                let (seq, id, source, text, blob) = row?;
                let stored = decode_embedding(&blob)
                    .ok_or_else(|| StoreError::CorruptEmbedding { id: id.clone() })?;
                let distance = 1.0 - cosine_similarity(&query, &stored);
                scored.push((
                    seq,
                    ScoredPassage {
                        id,
                        text,
                        source,
                        score: distance,
                    },
                ));
            }

            scored.sort_by(|a, b| {
                a.1.score
                    .total_cmp(&b.1.score)
                    .then_with(|| a.0.cmp(&b.0))
            });
            scored.truncate(k);
            Ok(scored.into_iter().map(|(_, p)| p).collect())
        })
        .await
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let collection = self.collection.clone();
        self.with_connection(move |conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM chunks WHERE collection = ?1",
                params![collection],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
        .await
    }

    async fn sources(&self) -> Result<Vec<String>, StoreError> {
        let collection = self.collection.clone();
        self.with_connection(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT source FROM chunks WHERE collection = ?1 ORDER BY source",
            )?;
            let sources = stmt
                .query_map(params![collection], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(sources)
        })
        .await
    }
}

fn encode_embedding(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    )
}

/// Cosine similarity; 0.0 for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
