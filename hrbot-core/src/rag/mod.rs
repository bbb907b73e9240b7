//! Retrieval pipeline: chunking, storage, ingestion, routing, and retrieval
//! of policy passages.

pub mod catalog;
pub mod chunk;
pub mod extract;
pub mod ingest;
pub mod retriever;
pub mod router;
pub mod store;

pub use catalog::{CatalogReconciliation, PolicyCatalog};
pub use chunk::{Chunk, TextSplitter};
pub use ingest::{IngestReport, IngestionPipeline};
pub use retriever::PassageRetriever;
pub use router::PolicyRouter;
pub use store::{EmbeddingRecord, ScoredPassage, SourceFilter, SqliteVectorStore, VectorStore};
