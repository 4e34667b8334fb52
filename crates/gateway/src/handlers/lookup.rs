//! Prediction and forecast lookups
//!
//! These serve the same direct-key data the chat pipeline grounds on, so
//! other services can render it without going through generation.

use super::{non_blank, parse_disaster_type, parse_fips, parse_state};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use disastershift_common::analytics::{lookup_prediction, ForecastRecord, PredictionSummary};
use disastershift_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;

#[derive(Debug, Deserialize)]
pub struct PredictQuery {
    pub disaster_type: String,
    pub fips_code: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TypesQuery {
    pub state: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChartQuery {
    pub state: String,
    pub disaster_type: String,
}

#[derive(Debug, Serialize)]
pub struct StatesResponse {
    pub states: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct TypesResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub disaster_types: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ScenarioEntry {
    pub disaster_type: String,
    pub fips_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub count: usize,
    pub items: Vec<T>,
}

impl<T> From<Vec<T>> for ListResponse<T> {
    fn from(items: Vec<T>) -> Self {
        Self {
            count: items.len(),
            items,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AvailableForecast {
    pub state: String,
    pub disaster_type: String,
    pub peak_months: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cv_mae: Option<f64>,
}

/// Exact county prediction, else the state aggregate
pub async fn predict(
    State(state): State<AppState>,
    Query(query): Query<PredictQuery>,
) -> Result<Json<PredictionSummary>> {
    let disaster_type = parse_disaster_type(&query.disaster_type)?;
    let fips_code = non_blank(query.fips_code).map(|f| parse_fips(&f)).transpose()?;
    let region_state = non_blank(query.state).map(|s| parse_state(&s)).transpose()?;

    if fips_code.is_none() && region_state.is_none() {
        return Err(AppError::MissingField {
            field: "fips_code or state".to_string(),
        });
    }

    let summary = lookup_prediction(
        state.engine.store(),
        &disaster_type,
        fips_code.as_deref(),
        region_state.as_deref(),
    );

    match summary {
        Some(summary) => {
            tracing::debug!(
                disaster_type = %disaster_type,
                region = %summary.region,
                sectors = summary.predictions.len(),
                "Prediction lookup"
            );
            Ok(Json(summary))
        }
        None => Err(AppError::NotFound {
            resource_type: "prediction".to_string(),
            id: format!(
                "{}/{}",
                disaster_type,
                fips_code.or(region_state).unwrap_or_default()
            ),
        }),
    }
}

/// Every precomputed (disaster, county) scenario
pub async fn scenarios(State(state): State<AppState>) -> Json<ListResponse<ScenarioEntry>> {
    let items: Vec<ScenarioEntry> = state
        .engine
        .store()
        .scenarios()
        .iter()
        .map(|entry| ScenarioEntry {
            disaster_type: entry.disaster_type.clone(),
            fips_code: entry.fips_code.clone(),
            region: entry.region.clone(),
        })
        .collect();

    Json(items.into())
}

pub async fn forecast(
    State(state): State<AppState>,
    Path((region_state, disaster_type)): Path<(String, String)>,
) -> Result<Json<ForecastRecord>> {
    let region_state = parse_state(&region_state)?;
    let disaster_type = parse_disaster_type(&disaster_type)?;

    state
        .engine
        .store()
        .forecast(&region_state, &disaster_type)
        .cloned()
        .map(Json)
        .ok_or_else(|| AppError::NotFound {
            resource_type: "forecast".to_string(),
            id: format!("{}/{}", region_state, disaster_type),
        })
}

/// (state, disaster type) combinations that have a forecast
pub async fn available_forecasts(State(state): State<AppState>) -> Json<ListResponse<AvailableForecast>> {
    let mut items: Vec<AvailableForecast> = state
        .engine
        .store()
        .forecasts()
        .iter()
        .map(|record| AvailableForecast {
            state: record.state.clone(),
            disaster_type: record.disaster_type.clone(),
            peak_months: record.peak_months.clone(),
            cv_mae: record.cv_mae,
        })
        .collect();
    items.sort_by(|a, b| (&a.state, &a.disaster_type).cmp(&(&b.state, &b.disaster_type)));

    Json(items.into())
}

/// Distinct states with at least one forecast
pub async fn forecast_states(State(state): State<AppState>) -> Json<StatesResponse> {
    let states: BTreeSet<&str> = state
        .engine
        .store()
        .forecasts()
        .iter()
        .map(|record| record.state.as_str())
        .collect();

    Json(StatesResponse {
        states: states.into_iter().map(str::to_string).collect(),
    })
}

/// Disaster types with a forecast, optionally narrowed to one state
pub async fn forecast_types(
    State(state): State<AppState>,
    Query(query): Query<TypesQuery>,
) -> Result<Json<TypesResponse>> {
    let region_state = non_blank(query.state).map(|s| parse_state(&s)).transpose()?;

    let types: BTreeSet<&str> = state
        .engine
        .store()
        .forecasts()
        .iter()
        .filter(|record| region_state.as_deref().map_or(true, |s| record.state == s))
        .map(|record| record.disaster_type.as_str())
        .collect();

    if let (Some(region_state), true) = (&region_state, types.is_empty()) {
        return Err(AppError::NotFound {
            resource_type: "forecasts for state".to_string(),
            id: region_state.clone(),
        });
    }

    Ok(Json(TypesResponse {
        disaster_types: types.into_iter().map(str::to_string).collect(),
        state: region_state,
    }))
}

/// Chart-ready horizon series for one (state, disaster type)
pub async fn forecast_chart(
    State(state): State<AppState>,
    Query(query): Query<ChartQuery>,
) -> Result<Json<Value>> {
    let region_state = parse_state(&query.state)?;
    let disaster_type = parse_disaster_type(&query.disaster_type)?;

    let record = state
        .engine
        .store()
        .forecast(&region_state, &disaster_type)
        .ok_or_else(|| AppError::NotFound {
            resource_type: "forecast".to_string(),
            id: format!("{}/{}", region_state, disaster_type),
        })?;

    let series: Vec<Value> = record
        .horizon
        .iter()
        .map(|point| {
            json!({
                "date": point.date,
                "predicted": point.predicted,
                "upper": point.upper_bound,
            })
        })
        .collect();

    Ok(Json(json!({
        "state": record.state,
        "disaster_type": record.disaster_type,
        "meta": {
            "total_historical_declarations": record.total_historical,
            "peak_months": record.peak_months,
            "cv_mae": record.cv_mae,
            "forecast_start": record.horizon.first().map(|p| &p.date),
            "forecast_end": record.horizon.last().map(|p| &p.date),
            "forecast_horizon_months": record.horizon.len(),
        },
        "forecast": series,
    })))
}
