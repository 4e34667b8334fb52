//! Chat handler - validates the request, then streams the answer as SSE

use super::{non_blank, parse_disaster_type, parse_fips, parse_state};
use crate::AppState;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use disastershift_common::errors::{AppError, Result};
use disastershift_common::ContextQuery;
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use validator::Validate;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize, Validate)]
pub struct ChatRequest {
    #[validate(length(min = 1, max = 2000))]
    pub message: String,
    pub state: Option<String>,
    pub disaster_type: Option<String>,
    #[validate(length(max = 200))]
    pub job_title: Option<String>,
    pub fips_code: Option<String>,
    #[validate(length(max = 32))]
    pub audience: Option<String>,
}

impl ChatRequest {
    /// Normalise every optional field; any bad one rejects the request
    pub fn into_query(self) -> Result<ContextQuery> {
        let question = self.message.trim().to_string();
        if question.is_empty() {
            return Err(AppError::invalid_field("message", "message must not be blank"));
        }

        Ok(ContextQuery {
            question,
            state: non_blank(self.state).map(|s| parse_state(&s)).transpose()?,
            disaster_type: non_blank(self.disaster_type)
                .map(|d| parse_disaster_type(&d))
                .transpose()?,
            job_title: non_blank(self.job_title),
            fips_code: non_blank(self.fips_code).map(|f| parse_fips(&f)).transpose()?,
            audience: non_blank(self.audience).map(|a| a.to_ascii_lowercase()),
        })
    }
}

/// Stream a grounded answer
///
/// Validation errors return before the stream opens. Once it opens, every
/// failure arrives in-band as `[ERROR] ...` followed by `[DONE]`.
pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;
    let query = request.into_query()?;

    tracing::info!(
        state = ?query.state,
        disaster_type = ?query.disaster_type,
        fips_code = ?query.fips_code,
        question_len = query.question.len(),
        "Chat request"
    );

    let events = state
        .streamer
        .respond(query)
        .map(|event| Ok::<_, Infallible>(Event::default().data(event.to_sse_data())));

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL)))
}
