//! In-memory knowledge index loaded from a JSON snapshot

use super::{IndexHit, KnowledgeChunk, KnowledgeIndex, MetadataFilter};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::Path;
use tracing::info;

/// On-disk snapshot written by the ingestion job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexSnapshot {
    pub embedding_model: String,
    pub dimension: usize,
    pub chunks: Vec<KnowledgeChunk>,
}

/// Brute-force cosine index
#[derive(Debug)]
pub struct InMemoryIndex {
    embedding_model: String,
    dimension: usize,
    chunks: Vec<KnowledgeChunk>,
    norms: Vec<f32>,
}

fn norm(vector: &[f32]) -> f32 {
    vector.iter().map(|v| v * v).sum::<f32>().sqrt()
}

impl InMemoryIndex {
    /// Load and validate a snapshot file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| AppError::DataLoad {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let snapshot: IndexSnapshot = serde_json::from_str(&raw).map_err(|e| AppError::DataLoad {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let index = Self::from_snapshot(snapshot)?;
        info!(
            path = %path.display(),
            chunks = index.chunks.len(),
            embedding_model = %index.embedding_model,
            dimension = index.dimension,
            "Knowledge snapshot loaded"
        );
        Ok(index)
    }

    /// Build from an already-parsed snapshot
    pub fn from_snapshot(snapshot: IndexSnapshot) -> Result<Self> {
        if let Some((i, chunk)) = snapshot
            .chunks
            .iter()
            .enumerate()
            .find(|(_, chunk)| chunk.embedding.len() != snapshot.dimension)
        {
            return Err(AppError::Index {
                message: format!(
                    "chunk {} ({}) has {} dimensions, snapshot declares {}",
                    i,
                    chunk.metadata.source,
                    chunk.embedding.len(),
                    snapshot.dimension
                ),
            });
        }

        let norms = snapshot.chunks.iter().map(|c| norm(&c.embedding)).collect();
        Ok(Self {
            embedding_model: snapshot.embedding_model,
            dimension: snapshot.dimension,
            chunks: snapshot.chunks,
            norms,
        })
    }

    fn cosine_distance(&self, index: usize, query: &[f32], query_norm: f32) -> f64 {
        let denom = self.norms[index] * query_norm;
        if denom == 0.0 {
            return 1.0;
        }
        let dot: f32 = self.chunks[index].embedding.iter().zip(query).map(|(a, b)| a * b).sum();
        1.0 - f64::from(dot / denom)
    }
}

#[async_trait]
impl KnowledgeIndex for InMemoryIndex {
    async fn query(&self, embedding: &[f32], filter: Option<&MetadataFilter>, k: usize) -> Result<Vec<IndexHit>> {
        if embedding.len() != self.dimension {
            return Err(AppError::Index {
                message: format!(
                    "query has {} dimensions, index expects {}",
                    embedding.len(),
                    self.dimension
                ),
            });
        }

        let query_norm = norm(embedding);
        let mut scored: Vec<(usize, f64)> = self
            .chunks
            .iter()
            .enumerate()
            .filter(|(_, chunk)| filter.map_or(true, |f| f.matches(&chunk.metadata)))
            .map(|(i, _)| (i, self.cosine_distance(i, embedding, query_norm)))
            .collect();

        // Ties keep snapshot order
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, distance)| IndexHit {
                text: self.chunks[i].text.clone(),
                metadata: self.chunks[i].metadata.clone(),
                distance,
            })
            .collect())
    }

    fn len(&self) -> usize {
        self.chunks.len()
    }

    fn backend(&self) -> &'static str {
        "memory"
    }

    fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{Category, ChunkMetadata, FilterClause};

    fn chunk(text: &str, embedding: Vec<f32>, category: Category, state: Option<&str>) -> KnowledgeChunk {
        KnowledgeChunk {
            text: text.to_string(),
            embedding,
            metadata: ChunkMetadata {
                category,
                state: state.map(str::to_string),
                disaster_type: None,
                source: format!("{}.md", text),
            },
        }
    }

    fn index() -> InMemoryIndex {
        InMemoryIndex::from_snapshot(IndexSnapshot {
            embedding_model: "test".into(),
            dimension: 2,
            chunks: vec![
                chunk("east", vec![1.0, 0.0], Category::General, None),
                chunk("north", vec![0.0, 1.0], Category::Cobra, None),
                chunk("northeast", vec![1.0, 1.0], Category::Unemployment, Some("FL")),
                chunk("zero", vec![0.0, 0.0], Category::General, None),
            ],
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_nearest_first() {
        let hits = index().query(&[1.0, 0.1], None, 3).await.unwrap();
        let texts: Vec<_> = hits.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(texts, vec!["east", "northeast", "north"]);
        assert!(hits[0].distance < hits[1].distance);
    }

    #[tokio::test]
    async fn test_filter_applies_before_k() {
        let filter = MetadataFilter {
            any_of: vec![
                FilterClause::State("FL".into()),
                FilterClause::Category(Category::Cobra),
            ],
        };
        let hits = index().query(&[1.0, 0.0], Some(&filter), 10).await.unwrap();
        let texts: Vec<_> = hits.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(texts, vec!["northeast", "north"]);
    }

    #[tokio::test]
    async fn test_zero_vector_has_max_distance() {
        let hits = index().query(&[1.0, 0.0], None, 4).await.unwrap();
        let zero = hits.iter().find(|h| h.text == "zero").unwrap();
        assert_eq!(zero.distance, 1.0);
    }

    #[tokio::test]
    async fn test_dimension_mismatch() {
        assert!(index().query(&[1.0, 0.0, 0.0], None, 1).await.is_err());

        let bad = IndexSnapshot {
            embedding_model: "test".into(),
            dimension: 3,
            chunks: vec![chunk("short", vec![1.0], Category::General, None)],
        };
        assert!(InMemoryIndex::from_snapshot(bad).is_err());
    }
}
