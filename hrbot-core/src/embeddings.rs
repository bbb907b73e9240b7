//! Pluggable embedding providers.
//!
//! Provides an async trait over embedding models with two implementations:
//! the OpenAI embeddings API (default) and a local hashed term-frequency
//! embedder that needs no network. The same instance must serve ingestion
//! and query embedding so the vectors are comparable.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingsConfig;
use crate::error::EmbeddingError;

/// Trait for embedding providers.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embeddings for a batch of texts, one vector per input, in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Generate an embedding for a single query text.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        match vectors.pop() {
            Some(v) if vectors.is_empty() => Ok(v),
            _ => Err(EmbeddingError::CountMismatch {
                expected: 1,
                actual: vectors.len() + 1,
            }),
        }
    }

    /// Return the dimensionality of embeddings.
    fn dimensions(&self) -> usize;

    /// Return the provider name.
    fn provider_name(&self) -> &str;
}

/// Local hashed term-frequency embedder. Deterministic and offline.
#[derive(Debug, Clone)]
pub struct LocalEmbedder {
    dimensions: usize,
}

impl LocalEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    /// Embed one text synchronously.
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];

        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        if words.is_empty() {
            return vector;
        }

        let mut tf: HashMap<&str, usize> = HashMap::new();
        for word in &words {
            *tf.entry(word).or_insert(0) += 1;
        }

        for (term, count) in &tf {
            let idx = simple_hash(term) % self.dimensions;
            vector[idx] += *count as f32;
        }

        // L2 normalize
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }

        vector
    }
}

/// djb2 string hash.
fn simple_hash(s: &str) -> usize {
    let mut hash: usize = 5381;
    for b in s.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(b as usize);
    }
    hash
}

#[async_trait]
impl Embedder for LocalEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn provider_name(&self) -> &str {
        "local"
    }
}

/// OpenAI API embedder (text-embedding-3-small by default).
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dims: usize,
    requested_dims: Option<usize>,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>,
        dimensions: usize,
        timeout_secs: u64,
    ) -> Result<Self, EmbeddingError> {
        let model = model.unwrap_or_else(|| "text-embedding-3-small".into());
        let default_dims = match model.as_str() {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        };
        let requested_dims = (dimensions > 0).then_some(dimensions);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::Request {
                message: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            api_key,
            model,
            dims: requested_dims.unwrap_or(default_dims),
            requested_dims,
            base_url: base_url
                .unwrap_or_else(|| "https://api.openai.com".into())
                .trim_end_matches('/')
                .to_string(),
        })
    }

    fn request_body(&self, texts: &[String]) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        if let Some(dims) = self.requested_dims {
            body["dimensions"] = serde_json::json!(dims);
        }
        body
    }

    /// Order vectors by the `index` the API reports and check the count.
    fn parse_response(
        body: &str,
        expected: usize,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut parsed: EmbeddingsResponse =
            serde_json::from_str(body).map_err(|e| EmbeddingError::ResponseParse {
                message: e.to_string(),
            })?;
        if parsed.data.len() != expected {
            return Err(EmbeddingError::CountMismatch {
                expected,
                actual: parsed.data.len(),
            });
        }
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/v1/embeddings", self.base_url);
        tracing::debug!(model = %self.model, inputs = texts.len(), "Requesting embeddings");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(texts))
            .send()
            .await
            .map_err(|e| EmbeddingError::Request {
                message: e.to_string(),
            })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| EmbeddingError::Request {
            message: e.to_string(),
        })?;
        if !status.is_success() {
            return Err(EmbeddingError::Request {
                message: format!("HTTP {}: {}", status.as_u16(), body),
            });
        }

        Self::parse_response(&body, texts.len())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn provider_name(&self) -> &str {
        "openai"
    }
}

/// Factory function to create an embedder based on configuration.
pub fn create_embedder(config: &EmbeddingsConfig) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    match config.provider.as_str() {
        "local" => {
            let dims = if config.dimensions > 0 {
                config.dimensions
            } else {
                256
            };
            Ok(Arc::new(LocalEmbedder::new(dims)))
        }
        "openai" => {
            let api_key = std::env::var(&config.api_key_env)
                .ok()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| EmbeddingError::MissingApiKey {
                    var: config.api_key_env.clone(),
                })?;
            Ok(Arc::new(OpenAiEmbedder::new(
                api_key,
                Some(config.model.clone()),
                config.base_url.clone(),
                config.dimensions,
                config.timeout_secs,
            )?))
        }
        other => Err(EmbeddingError::Request {
            message: format!("Unknown embedding provider '{other}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_embedder_deterministic_and_normalized() {
        let embedder = LocalEmbedder::new(64);
        let texts = vec!["Beca de estudio para diplomados".to_string()];
        let a = embedder.embed_batch(&texts).await.unwrap();
        let b = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(a, b);
        let norm: f32 = a[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_local_embedder_empty_text() {
        let embedder = LocalEmbedder::new(16);
        let v = embedder.embed_query("  ...  ").await.unwrap();
        assert_eq!(v, vec![0.0; 16]);
    }

    #[tokio::test]
    async fn test_local_embedder_batch_keeps_order() {
        let embedder = LocalEmbedder::new(32);
        let texts = vec!["cabañas".to_string(), "finiquito".to_string()];
        let batch = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1], embedder.embed("finiquito"));
    }

    #[test]
    fn test_openai_request_body_batches_input() {
        let embedder =
            OpenAiEmbedder::new("sk".into(), None, None, 0, 5).unwrap();
        let body = embedder.request_body(&["a".to_string(), "b".to_string()]);
        assert_eq!(body["model"], "text-embedding-3-small");
        assert_eq!(body["input"].as_array().unwrap().len(), 2);
        assert!(body.get("dimensions").is_none());
        assert_eq!(embedder.dimensions(), 1536);
    }

    #[test]
    fn test_openai_parse_response_sorts_by_index() {
        let body = r#"{"data":[
            {"index":1,"embedding":[0.0,1.0]},
            {"index":0,"embedding":[1.0,0.0]}
        ]}"#;
        let vectors = OpenAiEmbedder::parse_response(body, 2).unwrap();
        assert_eq!(vectors[0], vec![1.0, 0.0]);
        assert_eq!(vectors[1], vec![0.0, 1.0]);
    }

    #[test]
    fn test_openai_parse_response_count_mismatch() {
        let body = r#"{"data":[{"index":0,"embedding":[1.0]}]}"#;
        let err = OpenAiEmbedder::parse_response(body, 3).unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::CountMismatch {
                expected: 3,
                actual: 1
            }
        ));
    }

    #[test]
    fn test_create_embedder_local() {
        let config = EmbeddingsConfig {
            provider: "local".into(),
            dimensions: 0,
            ..Default::default()
        };
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.provider_name(), "local");
        assert_eq!(embedder.dimensions(), 256);
    }

    #[test]
    fn test_create_embedder_openai_requires_key() {
        let config = EmbeddingsConfig {
            api_key_env: "HRBOT_TEST_NO_SUCH_KEY".into(),
            ..Default::default()
        };
        let err = create_embedder(&config).err().unwrap();
        assert!(matches!(err, EmbeddingError::MissingApiKey { .. }));
    }
}
