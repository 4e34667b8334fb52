//! Health check handlers

use crate::AppState;
use axum::{extract::State, Json};
use disastershift_common::analytics::store::LoadStats;
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub checks: ReadyChecks,
}

#[derive(Serialize)]
pub struct ReadyChecks {
    pub analytics: LoadStats,
    pub knowledge: KnowledgeCheck,
    pub provider: &'static str,
}

#[derive(Serialize)]
pub struct KnowledgeCheck {
    pub backend: &'static str,
    pub chunks: usize,
    pub embedding_model: String,
}

/// Liveness probe - always returns healthy if server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: disastershift_common::VERSION,
    })
}

/// Readiness probe - everything is loaded at startup, so this reports what was loaded
pub async fn ready(State(state): State<AppState>) -> Json<ReadyResponse> {
    let analytics = state.engine.store().stats();
    let knowledge = state.streamer.assembler().map(|assembler| {
        let index = assembler.retriever().index();
        KnowledgeCheck {
            backend: index.backend(),
            chunks: index.len(),
            embedding_model: index.embedding_model().to_string(),
        }
    });

    let ready = analytics.scenarios > 0 && knowledge.as_ref().is_some_and(|k| k.chunks > 0);

    Json(ReadyResponse {
        status: if ready { "ready" } else { "not_ready" }.to_string(),
        checks: ReadyChecks {
            analytics,
            knowledge: knowledge.unwrap_or(KnowledgeCheck {
                backend: "none",
                chunks: 0,
                embedding_model: String::new(),
            }),
            provider: state.streamer.provider(),
        },
    })
}
