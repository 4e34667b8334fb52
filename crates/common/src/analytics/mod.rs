//! Structured analytics over the precomputed model outputs
//!
//! Provides:
//! - `AnalyticsStore`: init-once, read-many store of prediction and forecast rows
//! - `AnalyticsEngine`: six deterministic aggregations with typed results
//! - Rendering of those results into compact context text
//! - Direct-key prediction and forecast lookups

pub mod engine;
pub mod geo;
pub mod lookup;
pub mod render;
pub mod store;

pub use engine::{AnalyticsEngine, AnalyticsOp, StructuredResult};
pub use lookup::{lookup_prediction, ImpactSignal, PredictionSummary};
pub use render::render;
pub use store::{AnalyticsStore, ForecastRecord, PredictionRecord};
