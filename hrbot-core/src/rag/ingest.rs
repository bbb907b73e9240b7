//! Idempotent ingestion of policy documents into the vector store.
//!
//! Chunk ids are deterministic, so re-running ingestion only embeds chunks
//! whose id is not stored yet. All new chunks are embedded in one batch; if
//! that fails nothing is written.

use futures::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::DocumentsConfig;
use crate::embeddings::Embedder;
use crate::error::{EmbeddingError, IngestError};
use crate::rag::catalog::{CatalogReconciliation, PolicyCatalog};
use crate::rag::chunk::{Chunk, TextSplitter};
use crate::rag::extract::extract_text;
use crate::rag::store::{EmbeddingRecord, VectorStore};

/// A document that could not be read.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedDocument {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub documents_seen: usize,
    pub skipped: Vec<SkippedDocument>,
    pub chunks_total: usize,
    pub chunks_existing: usize,
    pub chunks_new: usize,
    pub store_count: usize,
    pub catalog: CatalogReconciliation,
}

impl IngestReport {
    pub fn is_noop(&self) -> bool {
        self.chunks_new == 0
    }
}

pub struct IngestionPipeline {
    documents_dir: PathBuf,
    extensions: Vec<String>,
    splitter: TextSplitter,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    catalog: PolicyCatalog,
}

impl IngestionPipeline {
    pub fn new(
        config: &DocumentsConfig,
        splitter: TextSplitter,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        catalog: PolicyCatalog,
    ) -> Self {
        Self {
            documents_dir: config.dir.clone(),
            extensions: config
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            splitter,
            embedder,
            store,
            catalog,
        }
    }

    /// Files to ingest: direct children of the documents directory with an
    /// accepted extension, sorted by name.
    pub fn list_documents(&self) -> Result<Vec<PathBuf>, IngestError> {
        if !self.documents_dir.is_dir() {
            return Err(IngestError::DirectoryUnreadable {
                path: self.documents_dir.clone(),
            });
        }
        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(&self.documents_dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable directory entry");
                    continue;
                }
            };
            if entry.file_type().is_file() && self.accepts(entry.path()) {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }

    fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.contains(&e.to_ascii_lowercase()))
            .unwrap_or(false)
    }

    /// Run a full ingestion pass.
    pub async fn run(&self) -> Result<IngestReport, IngestError> {
        let files = self.list_documents()?;
        let mut report = IngestReport {
            documents_seen: files.len(),
            ..Default::default()
        };

        let mut chunks: Vec<Chunk> = Vec::new();
        let mut names = Vec::new();
        let extracted = join_all(files.iter().map(|path| extract_text(path))).await;
        for (path, text) in files.iter().zip(extracted) {
            let name = file_name(path);
            match text {
                Ok(text) => {
                    let doc_chunks = self.splitter.split(&text, &name);
                    info!(document = %name, chunks = doc_chunks.len(), "Document chunked");
                    chunks.extend(doc_chunks);
                    names.push(name);
                }
                Err(e) => {
                    warn!(document = %name, error = %e, "Skipping unreadable document");
                    report.skipped.push(SkippedDocument {
                        path: path.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        report.catalog = self.catalog.reconcile(&names);
        report.catalog.log_warnings("ingest");
        report.chunks_total = chunks.len();

        let existing = self.store.exists_ids().await?;
        let mut seen_in_run = HashSet::new();
        let candidates: Vec<Chunk> = chunks
            .into_iter()
            .filter(|c| !existing.contains(&c.id) && seen_in_run.insert(c.id.clone()))
            .collect();
        report.chunks_existing = report.chunks_total - candidates.len();

        if candidates.is_empty() {
            info!(
                chunks = report.chunks_total,
                "No new chunks; vector store already up to date"
            );
            report.store_count = self.store.count().await?;
            return Ok(report);
        }

        let texts: Vec<String> = candidates.iter().map(|c| c.text.clone()).collect();
        info!(
            new_chunks = texts.len(),
            provider = self.embedder.provider_name(),
            "Embedding new chunks"
        );
        let vectors = self.embedder.embed_batch(&texts).await?;
        if vectors.len() != candidates.len() {
            return Err(IngestError::Embedding(EmbeddingError::CountMismatch {
                expected: candidates.len(),
                actual: vectors.len(),
            }));
        }

        let records: Vec<EmbeddingRecord> = candidates
            .into_iter()
            .zip(vectors)
            .map(|(chunk, embedding)| EmbeddingRecord {
                id: chunk.id,
                embedding,
                source: chunk.source,
                text: chunk.text,
            })
            .collect();

        report.chunks_new = self.store.upsert(records).await?;
        report.store_count = self.store.count().await?;
        info!(
            added = report.chunks_new,
            total = report.store_count,
            "Ingestion finished"
        );
        Ok(report)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CatalogEntry;
    use crate::embeddings::LocalEmbedder;
    use crate::rag::store::SqliteVectorStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts batch calls; fails when `fail` is set.
    struct CountingEmbedder {
        inner: LocalEmbedder,
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingEmbedder {
        fn new(fail: bool) -> Self {
            Self {
                inner: LocalEmbedder::new(64),
                calls: AtomicUsize::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(EmbeddingError::Request {
                    message: "service unavailable".into(),
                });
            }
            self.inner.embed_batch(texts).await
        }

        fn dimensions(&self) -> usize {
            64
        }

        fn provider_name(&self) -> &str {
            "counting"
        }
    }

    fn write_docs(dir: &Path) {
        std::fs::write(
            dir.join("vacaciones.txt"),
            "Los trabajadores tienen 15 días hábiles de feriado legal. ".repeat(30),
        )
        .unwrap();
        std::fs::write(
            dir.join("beca_estudio.txt"),
            "La beca cubre hasta el 50% del arancel de diplomados. ".repeat(30),
        )
        .unwrap();
        std::fs::write(dir.join("notas.docx"), "ignored").unwrap();
    }

    async fn pipeline(
        docs: &Path,
        db: &Path,
        embedder: Arc<dyn Embedder>,
    ) -> (IngestionPipeline, Arc<SqliteVectorStore>) {
        let config = DocumentsConfig {
            dir: docs.to_path_buf(),
            extensions: vec!["txt".into()],
            ..Default::default()
        };
        let store = Arc::new(SqliteVectorStore::open(db, "politicas").await.unwrap());
        let catalog = PolicyCatalog::new(vec![CatalogEntry::new(
            "beca_estudio.txt",
            "Becas",
        )]);
        let pipeline = IngestionPipeline::new(
            &config,
            TextSplitter::new(500, 50, "politica").unwrap(),
            embedder,
            store.clone(),
            catalog,
        );
        (pipeline, store)
    }

    #[tokio::test]
    async fn test_second_run_is_noop() {
        let docs = tempfile::tempdir().unwrap();
        let db = tempfile::tempdir().unwrap();
        write_docs(docs.path());
        let embedder = Arc::new(CountingEmbedder::new(false));
        let (pipeline, store) =
            pipeline(docs.path(), &db.path().join("v.db"), embedder.clone()).await;

        let first = pipeline.run().await.unwrap();
        assert_eq!(first.documents_seen, 2);
        assert!(first.chunks_new > 0);
        assert_eq!(first.chunks_new, first.chunks_total);
        let count_after_first = store.count().await.unwrap();
        assert_eq!(count_after_first, first.chunks_new);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);

        let second = pipeline.run().await.unwrap();
        assert!(second.is_noop());
        assert_eq!(second.chunks_existing, second.chunks_total);
        assert_eq!(store.count().await.unwrap(), count_after_first);
        // no embedding call when nothing is new
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_new_document_only_adds_its_chunks() {
        let docs = tempfile::tempdir().unwrap();
        let db = tempfile::tempdir().unwrap();
        write_docs(docs.path());
        let (pipeline, store) = pipeline(
            docs.path(),
            &db.path().join("v.db"),
            Arc::new(LocalEmbedder::new(64)),
        )
        .await;
        let first = pipeline.run().await.unwrap();

        std::fs::write(docs.path().join("mutuo.txt"), "Término por mutuo acuerdo.").unwrap();
        let second = pipeline.run().await.unwrap();
        assert_eq!(second.chunks_new, 1);
        assert_eq!(store.count().await.unwrap(), first.chunks_new + 1);
    }

    #[tokio::test]
    async fn test_embedding_failure_writes_nothing() {
        let docs = tempfile::tempdir().unwrap();
        let db = tempfile::tempdir().unwrap();
        write_docs(docs.path());
        let (pipeline, store) = pipeline(
            docs.path(),
            &db.path().join("v.db"),
            Arc::new(CountingEmbedder::new(true)),
        )
        .await;

        let err = pipeline.run().await.unwrap_err();
        assert!(matches!(err, IngestError::Embedding(_)));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unreadable_document_is_skipped() {
        let docs = tempfile::tempdir().unwrap();
        let db = tempfile::tempdir().unwrap();
        write_docs(docs.path());
        // invalid UTF-8
        std::fs::write(docs.path().join("roto.txt"), [0xff, 0xfe, 0xfd]).unwrap();
        let (pipeline, _store) = pipeline(
            docs.path(),
            &db.path().join("v.db"),
            Arc::new(LocalEmbedder::new(64)),
        )
        .await;

        let report = pipeline.run().await.unwrap();
        assert_eq!(report.documents_seen, 3);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].path.ends_with("roto.txt"));
        assert!(report.chunks_new > 0);
    }

    #[tokio::test]
    async fn test_report_flags_catalog_mismatch() {
        let docs = tempfile::tempdir().unwrap();
        let db = tempfile::tempdir().unwrap();
        write_docs(docs.path());
        let (pipeline, _store) = pipeline(
            docs.path(),
            &db.path().join("v.db"),
            Arc::new(LocalEmbedder::new(64)),
        )
        .await;
        let report = pipeline.run().await.unwrap();
        assert_eq!(report.catalog.undescribed, vec!["vacaciones.txt"]);
        assert!(report.catalog.missing.is_empty());
    }

    #[tokio::test]
    async fn test_missing_directory_is_error() {
        let db = tempfile::tempdir().unwrap();
        let (pipeline, _store) = pipeline(
            Path::new("/definitely/not/here"),
            &db.path().join("v.db"),
            Arc::new(LocalEmbedder::new(8)),
        )
        .await;
        assert!(matches!(
            pipeline.run().await,
            Err(IngestError::DirectoryUnreadable { .. })
        ));
    }
}
