//! Retrieval Engine - filtered similarity search over the knowledge index
//!
//! Provides:
//! - Query embedding with the index's own embedding model
//! - Metadata filter selection from the known state / disaster type
//! - Distance to similarity conversion

use super::{Category, FilterClause, KnowledgeIndex, MetadataFilter, RetrievedChunk};
use crate::analytics::store::round_to;
use crate::embeddings::{self, Embedder};
use crate::errors::Result;
use crate::metrics;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Cross-cutting categories kept when both state and disaster type are known
const STATE_AND_DISASTER_CATEGORIES: &[Category] = &[
    Category::ModelOutput,
    Category::Forecast,
    Category::Fema,
    Category::WarnAct,
    Category::Cobra,
    Category::Retraining,
    Category::RecoveryTimelines,
    Category::TransferableSkills,
];

/// National-scope categories kept when only the state is known
const STATE_CATEGORIES: &[Category] = &[
    Category::WarnAct,
    Category::Cobra,
    Category::Retraining,
    Category::RecoveryTimelines,
    Category::TransferableSkills,
];

/// Categories kept when only the disaster type is known
const DISASTER_CATEGORIES: &[Category] = &[
    Category::ModelOutput,
    Category::Forecast,
    Category::Fema,
    Category::RecoveryTimelines,
    Category::TransferableSkills,
];

/// Which filter shape a query used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterBranch {
    StateAndDisaster,
    StateOnly,
    DisasterOnly,
    Unfiltered,
}

impl FilterBranch {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterBranch::StateAndDisaster => "state_and_disaster",
            FilterBranch::StateOnly => "state_only",
            FilterBranch::DisasterOnly => "disaster_only",
            FilterBranch::Unfiltered => "unfiltered",
        }
    }
}

/// Disjunctive filter for the known scenario; `None` means search everything
pub fn build_filter(state: Option<&str>, disaster_type: Option<&str>) -> (FilterBranch, Option<MetadataFilter>) {
    let (branch, mut any_of, categories) = match (state, disaster_type) {
        (Some(state), Some(disaster)) => (
            FilterBranch::StateAndDisaster,
            vec![
                FilterClause::State(state.to_string()),
                FilterClause::DisasterType(disaster.to_string()),
            ],
            STATE_AND_DISASTER_CATEGORIES,
        ),
        (Some(state), None) => (
            FilterBranch::StateOnly,
            vec![FilterClause::State(state.to_string())],
            STATE_CATEGORIES,
        ),
        (None, Some(disaster)) => (
            FilterBranch::DisasterOnly,
            vec![FilterClause::DisasterType(disaster.to_string())],
            DISASTER_CATEGORIES,
        ),
        (None, None) => return (FilterBranch::Unfiltered, None),
    };

    any_of.extend(categories.iter().copied().map(FilterClause::Category));
    (branch, Some(MetadataFilter { any_of }))
}

/// Similarity search over a shared, read-only knowledge index
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn KnowledgeIndex>,
    default_k: usize,
}

impl Retriever {
    /// Pair an index with the embedder it was built with
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn KnowledgeIndex>, default_k: usize) -> Result<Self> {
        embeddings::ensure_compatible(embedder.as_ref(), index.embedding_model(), index.dimension())?;
        Ok(Self {
            embedder,
            index,
            default_k,
        })
    }

    pub fn index(&self) -> &dyn KnowledgeIndex {
        self.index.as_ref()
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    /// Top chunks for `query`, most similar first; never fails on zero hits
    pub async fn retrieve(
        &self,
        query: &str,
        state: Option<&str>,
        disaster_type: Option<&str>,
        k: Option<usize>,
    ) -> Result<Vec<RetrievedChunk>> {
        let start = Instant::now();
        let (branch, filter) = build_filter(state, disaster_type);

        let k = k.unwrap_or(self.default_k).min(self.index.len());
        if k == 0 {
            metrics::record_retrieval(start.elapsed().as_secs_f64(), branch.as_str(), 0);
            return Ok(Vec::new());
        }

        let embedding = self.embedder.embed(query).await?;
        let hits = self.index.query(&embedding, filter.as_ref(), k).await?;

        let chunks: Vec<RetrievedChunk> = hits
            .into_iter()
            .map(|hit| RetrievedChunk {
                text: hit.text,
                metadata: hit.metadata,
                similarity: round_to((1.0 - hit.distance).clamp(0.0, 1.0), 4),
            })
            .collect();

        metrics::record_retrieval(start.elapsed().as_secs_f64(), branch.as_str(), chunks.len());
        debug!(branch = branch.as_str(), k = k, hits = chunks.len(), "Knowledge retrieval complete");

        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbedder;
    use crate::knowledge::{ChunkMetadata, InMemoryIndex, IndexSnapshot, KnowledgeChunk};

    const DIM: usize = 128;

    fn chunk(embedder: &HashingEmbedder, text: &str, category: Category, state: Option<&str>, disaster: Option<&str>) -> KnowledgeChunk {
        KnowledgeChunk {
            text: text.to_string(),
            embedding: embedder.embed_text(text),
            metadata: ChunkMetadata {
                category,
                state: state.map(str::to_string),
                disaster_type: disaster.map(str::to_string),
                source: "kb.md".to_string(),
            },
        }
    }

    fn retriever() -> Retriever {
        let embedder = HashingEmbedder::new(DIM);
        let chunks = vec![
            chunk(&embedder, "California wildfire unemployment claims", Category::Unemployment, Some("CA"), None),
            chunk(&embedder, "wildfire smoke closes outdoor work", Category::General, None, Some("wildfire")),
            chunk(&embedder, "COBRA keeps employer health coverage", Category::Cobra, None, None),
            chunk(&embedder, "general wildfire history essay", Category::General, None, None),
            chunk(&embedder, "Texas flood unemployment office", Category::Unemployment, Some("TX"), Some("flood")),
            chunk(&embedder, "FEMA individual assistance grants", Category::Fema, None, None),
        ];
        let index = InMemoryIndex::from_snapshot(IndexSnapshot {
            embedding_model: HashingEmbedder::MODEL.to_string(),
            dimension: DIM,
            chunks,
        })
        .unwrap();
        Retriever::new(Arc::new(embedder), Arc::new(index), 6).unwrap()
    }

    #[test]
    fn test_filter_branches() {
        let (branch, filter) = build_filter(Some("CA"), Some("wildfire"));
        assert_eq!(branch, FilterBranch::StateAndDisaster);
        assert_eq!(filter.unwrap().any_of.len(), 2 + STATE_AND_DISASTER_CATEGORIES.len());

        let (branch, filter) = build_filter(Some("CA"), None);
        assert_eq!(branch, FilterBranch::StateOnly);
        assert!(!filter.unwrap().any_of.contains(&FilterClause::Category(Category::Fema)));

        let (branch, filter) = build_filter(None, Some("flood"));
        assert_eq!(branch, FilterBranch::DisasterOnly);
        assert!(filter.unwrap().any_of.contains(&FilterClause::Category(Category::Fema)));

        assert_eq!(build_filter(None, None), (FilterBranch::Unfiltered, None));
    }

    #[tokio::test]
    async fn test_state_and_disaster_excludes_untagged_general() {
        let chunks = retriever()
            .retrieve("wildfire jobs", Some("CA"), Some("wildfire"), Some(10))
            .await
            .unwrap();

        assert!(!chunks.is_empty());
        for chunk in &chunks {
            let m = &chunk.metadata;
            let allowed = m.state.as_deref() == Some("CA")
                || m.disaster_type.as_deref() == Some("wildfire")
                || STATE_AND_DISASTER_CATEGORIES.contains(&m.category);
            assert!(allowed, "unexpected chunk {:?}", chunk.text);
        }
        assert!(chunks.iter().all(|c| c.text != "general wildfire history essay"));
        assert!(chunks.iter().all(|c| c.text != "Texas flood unemployment office"));
    }

    #[tokio::test]
    async fn test_unfiltered_searches_everything() {
        let chunks = retriever().retrieve("wildfire history", None, None, Some(10)).await.unwrap();
        // k is capped by index size
        assert_eq!(chunks.len(), 6);
        assert_eq!(chunks[0].text, "general wildfire history essay");
        for pair in chunks.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
        assert!(chunks.iter().all(|c| (0.0..=1.0).contains(&c.similarity)));
    }

    #[tokio::test]
    async fn test_state_only_and_empty_index() {
        let chunks = retriever()
            .retrieve("anything", Some("WY"), None, Some(3))
            .await
            .unwrap();
        // Only the national COBRA chunk survives a WY filter
        assert_eq!(chunks.len(), 1);

        let empty = InMemoryIndex::from_snapshot(IndexSnapshot {
            embedding_model: HashingEmbedder::MODEL.to_string(),
            dimension: DIM,
            chunks: vec![],
        })
        .unwrap();
        let retriever = Retriever::new(Arc::new(HashingEmbedder::new(DIM)), Arc::new(empty), 6).unwrap();
        assert!(retriever.retrieve("anything", None, None, None).await.unwrap().is_empty());
    }

    #[test]
    fn test_mismatched_embedder_rejected() {
        let index = InMemoryIndex::from_snapshot(IndexSnapshot {
            embedding_model: "all-minilm".to_string(),
            dimension: DIM,
            chunks: vec![],
        })
        .unwrap();
        assert!(Retriever::new(Arc::new(HashingEmbedder::new(DIM)), Arc::new(index), 6).is_err());
    }
}
