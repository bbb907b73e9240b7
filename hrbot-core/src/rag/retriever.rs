//! Similarity retrieval restricted to one policy document.

use std::sync::Arc;
use tracing::debug;

use crate::embeddings::Embedder;
use crate::error::RetrievalError;
use crate::rag::store::{ScoredPassage, SourceFilter, VectorStore};

pub struct PassageRetriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
}

impl PassageRetriever {
    /// `embedder` must be the one used at ingestion time.
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }

    /// Up to `k` passages of `document`, most relevant first, with distances.
    pub async fn retrieve_scored(
        &self,
        question: &str,
        document: &str,
        k: usize,
    ) -> Result<Vec<ScoredPassage>, RetrievalError> {
        let embedding = self.embedder.embed_query(question).await?;
        let passages = self
            .store
            .query(&embedding, SourceFilter::only(document), k)
            .await?;
        debug!(document, found = passages.len(), "Passages retrieved");
        Ok(passages)
    }

    /// Passage texts only. An empty result is not an error.
    pub async fn retrieve(
        &self,
        question: &str,
        document: &str,
        k: usize,
    ) -> Result<Vec<String>, RetrievalError> {
        Ok(self
            .retrieve_scored(question, document, k)
            .await?
            .into_iter()
            .map(|p| p.text)
            .collect())
    }
}
