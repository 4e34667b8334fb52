//! Context Assembler - builds one deterministic payload per request
//!
//! Provides:
//! - Guaranteed forecast / prediction context by direct key lookup
//! - Optional structured analytics context chosen by the classifier
//! - Filtered knowledge retrieval
//! - Audience resolution
//!
//! The three lookups have no data dependency on each other and run
//! concurrently; assembly waits for all of them.

use super::audience::{resolve_audience, AudienceType};
use super::guaranteed::{forecast_context, prediction_context};
use super::query_classifier::classify;
use crate::analytics::geo;
use crate::analytics::{render, AnalyticsEngine, StructuredResult};
use crate::errors::Result;
use crate::knowledge::{RetrievedChunk, Retriever};
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info};

/// Validated inputs for one chat request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextQuery {
    pub question: String,
    /// Uppercase postal code
    pub state: Option<String>,
    /// Canonical `[a-z_]+` disaster type
    pub disaster_type: Option<String>,
    pub job_title: Option<String>,
    pub fips_code: Option<String>,
    pub audience: Option<String>,
}

impl ContextQuery {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Default::default()
        }
    }

    /// Explicit state, else the one named by the FIPS prefix
    fn effective_state(&self) -> Option<String> {
        self.state.clone().or_else(|| {
            self.fips_code
                .as_deref()
                .and_then(geo::state_for_fips)
                .map(str::to_string)
        })
    }
}

/// Everything the generator is allowed to know for one request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextPayload {
    pub forecast_context: String,
    pub prediction_context: String,
    /// Rendered structured analytics; `None` when nothing qualified
    pub structured_context: Option<String>,
    /// Typed rows behind `structured_context`
    pub structured: Option<StructuredResult>,
    pub retrieved_chunks: Vec<RetrievedChunk>,
    pub audience: AudienceType,
    pub state: Option<String>,
    pub disaster_type: Option<String>,
    pub job_title: Option<String>,
}

/// Request-scoped assembly over shared, read-only collaborators
#[derive(Clone)]
pub struct ContextAssembler {
    engine: AnalyticsEngine,
    retriever: Retriever,
}

impl ContextAssembler {
    pub fn new(engine: AnalyticsEngine, retriever: Retriever) -> Self {
        Self { engine, retriever }
    }

    pub fn engine(&self) -> &AnalyticsEngine {
        &self.engine
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Assemble the payload; only retrieval infrastructure failures are errors
    pub async fn assemble(&self, query: &ContextQuery) -> Result<ContextPayload> {
        let start = Instant::now();
        let state = query.effective_state();
        let state = state.as_deref();
        let disaster_type = query.disaster_type.as_deref();
        let store = self.engine.store();

        let guaranteed = async {
            (
                forecast_context(store, state, disaster_type),
                prediction_context(store, disaster_type, query.fips_code.as_deref(), state),
            )
        };

        let structured = async {
            let op = classify(&query.question, state, disaster_type)?;
            let result = self.engine.execute(&op);
            debug!(op = op.name(), rows = result.row_count(), "Structured query classified");
            // Empty results contribute nothing
            (!result.is_empty()).then_some(result)
        };

        let retrieval = self.retriever.retrieve(&query.question, state, disaster_type, None);

        let ((forecast_context, prediction_context), structured, retrieved) =
            tokio::join!(guaranteed, structured, retrieval);
        let retrieved_chunks = retrieved?;

        let audience = resolve_audience(
            query.audience.as_deref(),
            query.job_title.as_deref(),
            &query.question,
        );

        let structured_context = structured.as_ref().map(render);

        info!(
            audience = audience.as_str(),
            structured = structured_context.is_some(),
            chunks = retrieved_chunks.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Context assembled"
        );

        Ok(ContextPayload {
            forecast_context,
            prediction_context,
            structured_context,
            structured,
            retrieved_chunks,
            audience,
            state: state.map(str::to_string),
            disaster_type: query.disaster_type.clone(),
            job_title: query.job_title.clone(),
        })
    }
}
