//! DisasterShift Common Library
//!
//! Query orchestration core shared by the DisasterShift services:
//! - Analytics store and deterministic aggregations over model outputs
//! - Knowledge index abstraction and filtered retrieval
//! - Embedding client abstraction
//! - Query classification, context assembly and prompt construction
//! - Generation backends and the answer streamer
//! - Error types, configuration and metrics

pub mod analytics;
pub mod config;
pub mod context;
pub mod embeddings;
pub mod errors;
pub mod generation;
pub mod knowledge;
pub mod metrics;

// Re-export commonly used types
pub use analytics::{AnalyticsEngine, AnalyticsStore};
pub use config::AppConfig;
pub use context::{ContextAssembler, ContextPayload, ContextQuery};
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use generation::{AnswerStreamer, GenerationBackend, StreamEvent};
pub use knowledge::{KnowledgeIndex, Retriever};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
