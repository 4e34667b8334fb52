//! Embedding service abstraction
//!
//! Provides a unified interface for the embedding providers the knowledge
//! index can be built with:
//! - Ollama (all-minilm and other local models)
//! - OpenAI-compatible `/embeddings` endpoints
//! - Feature hashing (deterministic, offline)
//!
//! Queries must be embedded with the same model the index was built with;
//! `ensure_compatible` enforces this at startup.

use crate::config::EmbeddingConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Trait for embedding generation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

/// Fail unless the embedder produces vectors in the index's embedding space
pub fn ensure_compatible(embedder: &dyn Embedder, index_model: &str, index_dimension: usize) -> Result<()> {
    if embedder.model_name() != index_model || embedder.dimension() != index_dimension {
        return Err(AppError::Configuration {
            message: format!(
                "embedding model mismatch: index built with {} ({} dims), configured {} ({} dims)",
                index_model,
                index_dimension,
                embedder.model_name(),
                embedder.dimension()
            ),
        });
    }
    Ok(())
}

fn check_dimension(model: &str, expected: usize, embedding: &[f32]) -> Result<()> {
    if embedding.len() != expected {
        return Err(AppError::EmbeddingError {
            message: format!(
                "{} returned {} dimensions, expected {}",
                model,
                embedding.len(),
                expected
            ),
        });
    }
    Ok(())
}

/// Ollama embedding client
pub struct OllamaEmbedder {
    client: reqwest::Client,
    model: String,
    dimension: usize,
    base_url: String,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct OllamaResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedder {
    pub fn new(model: String, dimension: usize, base_url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            model,
            dimension,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let start = Instant::now();
        let url = format!("{}/api/embeddings", self.base_url);

        let result: Result<Vec<f32>> = async {
            let response = self
                .client
                .post(&url)
                .json(&OllamaRequest {
                    model: &self.model,
                    prompt: text,
                })
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        AppError::EmbeddingTimeout {
                            timeout_ms: start.elapsed().as_millis() as u64,
                        }
                    } else {
                        AppError::EmbeddingError {
                            message: format!("Request failed: {}", e),
                        }
                    }
                })?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(AppError::EmbeddingError {
                    message: format!("Ollama error {}: {}", status, body),
                });
            }

            let parsed: OllamaResponse = response.json().await.map_err(|e| AppError::EmbeddingError {
                message: format!("Failed to parse response: {}", e),
            })?;
            check_dimension(&self.model, self.dimension, &parsed.embedding)?;
            Ok(parsed.embedding)
        }
        .await;

        metrics::record_embedding(start.elapsed().as_secs_f64(), &self.model, 1, result.is_ok());
        result
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// OpenAI-compatible embedding client
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimension: usize,
    base_url: String,
    max_retries: u32,
}

#[derive(Serialize)]
struct OpenAIRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    data: Vec<OpenAIEmbedding>,
}

#[derive(Deserialize)]
struct OpenAIEmbedding {
    embedding: Vec<f32>,
}

impl OpenAIEmbedder {
    pub fn new(
        api_key: String,
        model: String,
        dimension: usize,
        base_url: Option<String>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            api_key,
            model,
            dimension,
            base_url: base_url
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
            max_retries,
        })
    }

    /// Make request with exponential backoff; 4xx responses are not retried
    async fn request_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(200),
            max_interval: Duration::from_secs(5),
            max_elapsed_time: Some(Duration::from_secs(60)),
            ..Default::default()
        };

        let mut attempt = 0u32;
        let max_retries = self.max_retries;

        retry(policy, || {
            attempt += 1;
            let current = attempt;
            async move {
                match self.make_request(texts).await {
                    Ok(embeddings) => Ok(embeddings),
                    Err(e @ AppError::Validation { .. }) => Err(backoff::Error::permanent(e)),
                    Err(e) if current > max_retries => Err(backoff::Error::permanent(e)),
                    Err(e) => {
                        tracing::warn!(
                            attempt = current,
                            max_retries = max_retries,
                            error = %e,
                            "Embedding request failed, retrying"
                        );
                        Err(backoff::Error::transient(e))
                    }
                }
            }
        })
        .await
    }

    async fn make_request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&OpenAIRequest {
                input: texts,
                model: &self.model,
            })
            .send()
            .await
            .map_err(|e| AppError::EmbeddingError {
                message: format!("Request failed: {}", e),
            })?;

        let status = response.status();
        if status.is_client_error() && status.as_u16() != 429 {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Validation {
                message: format!("Embedding API rejected request {}: {}", status, body),
                field: None,
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::EmbeddingError {
                message: format!("API error {}: {}", status, body),
            });
        }

        let result: OpenAIResponse = response.json().await.map_err(|e| AppError::EmbeddingError {
            message: format!("Failed to parse response: {}", e),
        })?;

        let embeddings: Vec<Vec<f32>> = result.data.into_iter().map(|e| e.embedding).collect();
        for embedding in &embeddings {
            check_dimension(&self.model, self.dimension, embedding)?;
        }
        Ok(embeddings)
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let start = Instant::now();
        let result = self
            .request_with_retry(&[text.to_string()])
            .await
            .map_err(|e| match e {
                AppError::Validation { message, .. } => AppError::EmbeddingError { message },
                other => other,
            })
            .and_then(|embeddings| {
                embeddings.into_iter().next().ok_or_else(|| AppError::EmbeddingError {
                    message: "Empty response".to_string(),
                })
            });

        metrics::record_embedding(start.elapsed().as_secs_f64(), &self.model, 1, result.is_ok());
        result
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        const BATCH_SIZE: usize = 100;

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(BATCH_SIZE) {
            let start = Instant::now();
            let result = self.request_with_retry(chunk).await;
            metrics::record_embedding(start.elapsed().as_secs_f64(), &self.model, chunk.len(), result.is_ok());
            all_embeddings.extend(result?);
        }

        Ok(all_embeddings)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic feature-hashing embedder
///
/// Each lowercase alphanumeric token is hashed with SHA-256 into one signed
/// bucket; the result is L2-normalised. Texts sharing vocabulary land close
/// together, which is enough for offline runs and tests.
pub struct HashingEmbedder {
    model: String,
    dimension: usize,
}

impl HashingEmbedder {
    pub const MODEL: &'static str = "feature-hashing";

    pub fn new(dimension: usize) -> Self {
        Self::with_model(Self::MODEL, dimension)
    }

    /// Hashing embedder reporting a custom model name
    pub fn with_model(model: &str, dimension: usize) -> Self {
        Self {
            model: model.to_string(),
            dimension: dimension.max(1),
        }
    }

    /// Embed synchronously
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        let lowered = text.to_lowercase();
        for token in lowered.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_text(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    let timeout = Duration::from_secs(config.timeout_secs);

    match config.provider.as_str() {
        "ollama" => {
            let base_url = config
                .api_base
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string());
            Ok(Arc::new(OllamaEmbedder::new(
                config.model.clone(),
                config.dimension,
                base_url,
                timeout,
            )?))
        }
        "openai" => {
            let key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
                message: "embedding.api_key is required for the openai provider".to_string(),
            })?;
            Ok(Arc::new(OpenAIEmbedder::new(
                key,
                config.model.clone(),
                config.dimension,
                config.api_base.clone(),
                timeout,
                config.max_retries,
            )?))
        }
        "hashing" => Ok(Arc::new(HashingEmbedder::with_model(&config.model, config.dimension))),
        other => Err(AppError::Configuration {
            message: format!("unknown embedding provider '{}'", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn test_hashing_embedder_is_deterministic() {
        let embedder = HashingEmbedder::new(384);
        let a = embedder.embed("Hurricane recovery in Florida").await.unwrap();
        let b = embedder.embed("hurricane RECOVERY in florida").await.unwrap();
        assert_eq!(a.len(), 384);
        assert_eq!(a, b);

        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_hashing_embedder_similarity() {
        let embedder = HashingEmbedder::new(256);
        let query = embedder.embed("construction jobs after hurricane").await.unwrap();
        let close = embedder.embed("hurricane construction jobs surge").await.unwrap();
        let far = embedder.embed("COBRA continuation coverage rules").await.unwrap();
        assert!(cosine(&query, &close) > cosine(&query, &far));
    }

    #[tokio::test]
    async fn test_hashing_batch() {
        let embedder = HashingEmbedder::new(64);
        let texts = vec!["flood".to_string(), String::new()];
        let embeddings = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(embeddings.len(), 2);
        assert!(embeddings[1].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_ensure_compatible() {
        let embedder = HashingEmbedder::with_model("all-minilm", 384);
        assert!(ensure_compatible(&embedder, "all-minilm", 384).is_ok());
        assert!(ensure_compatible(&embedder, "nomic-embed-text", 384).is_err());
        assert!(ensure_compatible(&embedder, "all-minilm", 768).is_err());
    }

    #[test]
    fn test_create_embedder() {
        let mut config = EmbeddingConfig::default();
        config.provider = "hashing".to_string();
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.model_name(), "all-minilm");
        assert_eq!(embedder.dimension(), 384);

        config.provider = "openai".to_string();
        assert!(create_embedder(&config).is_err());

        config.provider = "mock".to_string();
        assert!(create_embedder(&config).is_err());
    }
}
