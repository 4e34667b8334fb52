//! Knowledge Index abstraction
//!
//! Provides:
//! - The chunk and metadata schema produced by offline ingestion
//! - Disjunctive metadata filters
//! - The `KnowledgeIndex` capability trait with in-memory and pgvector backends
//! - The retrieval engine on top of it
//!
//! The index is owned externally and read-only to this crate.

mod memory;
mod pgvector;
pub mod retriever;

pub use memory::{InMemoryIndex, IndexSnapshot};
pub use pgvector::{DbPool, PgVectorIndex};
pub use retriever::{FilterBranch, Retriever};

use crate::config::{KnowledgeBackend, KnowledgeConfig};
use crate::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Closed set of chunk categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    ModelOutput,
    Forecast,
    Fema,
    WarnAct,
    Cobra,
    Retraining,
    RecoveryTimelines,
    TransferableSkills,
    Unemployment,
    FinancialAid,
    General,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::ModelOutput => "model_output",
            Category::Forecast => "forecast",
            Category::Fema => "fema",
            Category::WarnAct => "warn_act",
            Category::Cobra => "cobra",
            Category::Retraining => "retraining",
            Category::RecoveryTimelines => "recovery_timelines",
            Category::TransferableSkills => "transferable_skills",
            Category::Unemployment => "unemployment",
            Category::FinancialAid => "financial_aid",
            Category::General => "general",
        }
    }

    /// Parse a stored category tag
    pub fn parse(tag: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(tag.to_string())).ok()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured tags carried by every chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChunkMetadata {
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disaster_type: Option<String>,
    pub source: String,
}

/// An indexed chunk with its embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KnowledgeChunk {
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
}

/// Raw index hit with the backend's cosine distance
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub text: String,
    pub metadata: ChunkMetadata,
    pub distance: f64,
}

/// A chunk ranked for one query; similarity in [0, 1]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub text: String,
    pub metadata: ChunkMetadata,
    pub similarity: f64,
}

/// One equality test in a filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterClause {
    State(String),
    DisasterType(String),
    Category(Category),
}

impl FilterClause {
    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        match self {
            FilterClause::State(state) => metadata.state.as_deref() == Some(state.as_str()),
            FilterClause::DisasterType(disaster) => metadata.disaster_type.as_deref() == Some(disaster.as_str()),
            FilterClause::Category(category) => metadata.category == *category,
        }
    }
}

/// A chunk passes when any clause matches
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MetadataFilter {
    pub any_of: Vec<FilterClause>,
}

impl MetadataFilter {
    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        self.any_of.iter().any(|clause| clause.matches(metadata))
    }
}

/// Similarity-searchable, read-only chunk store
#[async_trait]
pub trait KnowledgeIndex: Send + Sync {
    /// Up to `k` nearest chunks passing `filter`, nearest first
    async fn query(&self, embedding: &[f32], filter: Option<&MetadataFilter>, k: usize) -> Result<Vec<IndexHit>>;

    /// Number of indexed chunks
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Backend name for logs and readiness
    fn backend(&self) -> &'static str;

    /// Embedding model the index was built with
    fn embedding_model(&self) -> &str;

    /// Dimension of the stored embeddings
    fn dimension(&self) -> usize;
}

/// Open the configured knowledge index
pub async fn open_index(
    config: &KnowledgeConfig,
    embedding_model: &str,
    dimension: usize,
) -> Result<Arc<dyn KnowledgeIndex>> {
    match config.backend {
        KnowledgeBackend::Memory => Ok(Arc::new(InMemoryIndex::load(&config.snapshot_path)?)),
        KnowledgeBackend::Pgvector => {
            let pool = DbPool::new(config).await?;
            Ok(Arc::new(
                PgVectorIndex::connect(pool, &config.table, embedding_model, dimension).await?,
            ))
        }
    }
}
