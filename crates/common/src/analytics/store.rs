//! Analytics Store - precomputed model outputs held in memory
//!
//! Provides:
//! - Loading of the employment-impact and frequency-forecast datasets
//! - Load-time enforcement of the one-signal-per-row invariant
//! - Indexes by (state, disaster type) and (disaster type, FIPS code)
//!
//! The store is built once before the service accepts traffic and is
//! read-only afterwards; share it behind an `Arc`.

use super::geo;
use crate::errors::{AppError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{info, warn};

/// Number of forecast months summarised per record
pub const HORIZON_MONTHS: usize = 12;

/// One sector-level employment-impact prediction for one county
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionRecord {
    pub disaster_type: String,
    pub fips_code: String,
    /// Empty when the FIPS prefix is unknown
    pub state: String,
    pub region: String,
    pub sector: String,
    pub job_loss_pct: Option<f64>,
    pub job_change_pct: Option<f64>,
    pub recovery_months: Option<f64>,
    pub peak_month: Option<f64>,
}

/// Frequency forecast for one (state, disaster type)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastRecord {
    pub state: String,
    pub disaster_type: String,
    pub total_historical: u64,
    pub peak_months: Vec<String>,
    /// Mean predicted declarations per month over the first twelve months
    pub avg_next_12: Option<f64>,
    pub cv_mae: Option<f64>,
    pub horizon: Vec<HorizonPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HorizonPoint {
    pub date: String,
    pub predicted: f64,
    pub upper_bound: Option<f64>,
}

/// Per-sector values as they appear in the predictions file
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
pub struct SectorValues {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_loss_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_change_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_months: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peak_month: Option<f64>,
}

impl SectorValues {
    /// Exactly one of loss or change is present
    pub fn has_single_signal(&self) -> bool {
        self.job_loss_pct.is_some() != self.job_change_pct.is_some()
    }
}

/// One (disaster, county) scenario from the predictions file
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PredictionEntry {
    pub disaster_type: String,
    #[serde(deserialize_with = "fips_from_string_or_number")]
    pub fips_code: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub predictions: BTreeMap<String, SectorValues>,
}

fn fips_from_string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Fips {
        Text(String),
        Number(u64),
    }

    Ok(match Fips::deserialize(deserializer)? {
        Fips::Text(text) => text.trim().to_string(),
        Fips::Number(number) => format!("{:05}", number),
    })
}

#[derive(Debug, Default, Deserialize)]
struct RawForecast {
    #[serde(default)]
    model_info: RawModelInfo,
    #[serde(default)]
    forecast: RawHorizon,
}

#[derive(Debug, Default, Deserialize)]
struct RawModelInfo {
    #[serde(default)]
    total_historical: f64,
    #[serde(default)]
    peak_months: Vec<String>,
    #[serde(default)]
    cv_mae: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawHorizon {
    #[serde(default)]
    dates: Vec<String>,
    #[serde(default)]
    predicted_counts: Vec<f64>,
    #[serde(default)]
    upper_bound: Vec<f64>,
}

/// Load statistics for logging and readiness
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadStats {
    pub scenarios: usize,
    pub prediction_rows: usize,
    pub rejected_rows: usize,
    pub forecasts: usize,
    pub skipped_forecasts: usize,
}

type Key = (String, String);

/// In-memory relational store over both datasets
#[derive(Debug, Default)]
pub struct AnalyticsStore {
    entries: Vec<PredictionEntry>,
    predictions: Vec<PredictionRecord>,
    forecasts: Vec<ForecastRecord>,
    /// (state, disaster_type) -> prediction row indexes
    predictions_by_state: HashMap<Key, Vec<usize>>,
    /// (disaster_type, fips_code) -> entry index
    entries_by_fips: HashMap<Key, usize>,
    /// (state, disaster_type) -> entry indexes
    entries_by_state: HashMap<Key, Vec<usize>>,
    /// (state, disaster_type) -> forecast index
    forecasts_by_state: HashMap<Key, usize>,
    stats: LoadStats,
}

impl AnalyticsStore {
    /// Load both datasets from disk; a missing or malformed file is fatal
    pub fn load(predictions_path: &Path, forecasts_path: &Path) -> Result<Self> {
        let predictions = read_file(predictions_path)?;
        let forecasts = read_file(forecasts_path)?;

        Self::from_json(&predictions, &forecasts).map_err(|e| match e {
            AppError::Serialization(err) => AppError::DataLoad {
                path: format!("{} / {}", predictions_path.display(), forecasts_path.display()),
                message: err.to_string(),
            },
            other => other,
        })
    }

    /// Build a store from the raw JSON documents
    pub fn from_json(predictions_json: &str, forecasts_json: &str) -> Result<Self> {
        let entries: Vec<PredictionEntry> = serde_json::from_str(predictions_json)?;
        let forecasts: BTreeMap<String, RawForecast> = serde_json::from_str(forecasts_json)?;

        let mut store = Self::default();
        for entry in entries {
            store.insert_entry(entry);
        }
        for (key, raw) in forecasts {
            store.insert_forecast(&key, raw);
        }

        info!(
            scenarios = store.stats.scenarios,
            prediction_rows = store.stats.prediction_rows,
            rejected_rows = store.stats.rejected_rows,
            forecasts = store.stats.forecasts,
            "Analytics store loaded"
        );

        Ok(store)
    }

    fn insert_entry(&mut self, mut entry: PredictionEntry) {
        entry.disaster_type = geo::normalize_disaster_type(&entry.disaster_type)
            .unwrap_or_else(|| entry.disaster_type.to_lowercase());
        let state = geo::state_for_fips(&entry.fips_code).unwrap_or_default().to_string();
        let region = entry.region.clone().unwrap_or_else(|| entry.fips_code.clone());

        let mut rejected = Vec::new();
        for (sector, values) in &entry.predictions {
            if !values.has_single_signal() {
                rejected.push(sector.clone());
                continue;
            }

            let index = self.predictions.len();
            self.predictions.push(PredictionRecord {
                disaster_type: entry.disaster_type.clone(),
                fips_code: entry.fips_code.clone(),
                state: state.clone(),
                region: region.clone(),
                sector: sector.clone(),
                job_loss_pct: values.job_loss_pct,
                job_change_pct: values.job_change_pct,
                recovery_months: values.recovery_months,
                peak_month: values.peak_month,
            });
            if !state.is_empty() {
                self.predictions_by_state
                    .entry((state.clone(), entry.disaster_type.clone()))
                    .or_default()
                    .push(index);
            }
        }

        for sector in &rejected {
            warn!(
                fips_code = %entry.fips_code,
                disaster_type = %entry.disaster_type,
                sector = %sector,
                "Rejected prediction row: expected exactly one of job_loss_pct / job_change_pct"
            );
            entry.predictions.remove(sector);
        }
        self.stats.rejected_rows += rejected.len();
        self.stats.prediction_rows = self.predictions.len();

        let index = self.entries.len();
        self.entries_by_fips
            .insert((entry.disaster_type.clone(), entry.fips_code.clone()), index);
        if !state.is_empty() {
            self.entries_by_state
                .entry((state, entry.disaster_type.clone()))
                .or_default()
                .push(index);
        }
        self.entries.push(entry);
        self.stats.scenarios = self.entries.len();
    }

    fn insert_forecast(&mut self, key: &str, raw: RawForecast) {
        let Some((state, suffix)) = key.split_once('_') else {
            warn!(key = %key, "Skipping forecast with malformed key");
            self.stats.skipped_forecasts += 1;
            return;
        };

        let predicted: Vec<f64> = raw
            .forecast
            .predicted_counts
            .iter()
            .take(HORIZON_MONTHS)
            .copied()
            .collect();
        let avg_next_12 = (!predicted.is_empty())
            .then(|| round_to(predicted.iter().sum::<f64>() / predicted.len() as f64, 3));

        let horizon = raw
            .forecast
            .dates
            .iter()
            .zip(&predicted)
            .enumerate()
            .map(|(i, (date, value))| HorizonPoint {
                date: date.clone(),
                predicted: *value,
                upper_bound: raw.forecast.upper_bound.get(i).copied(),
            })
            .collect();

        let record = ForecastRecord {
            state: state.to_ascii_uppercase(),
            disaster_type: geo::disaster_type_from_forecast_suffix(suffix),
            total_historical: raw.model_info.total_historical.max(0.0) as u64,
            peak_months: raw.model_info.peak_months,
            avg_next_12,
            cv_mae: raw.model_info.cv_mae,
            horizon,
        };

        let index = self.forecasts.len();
        self.forecasts_by_state
            .insert((record.state.clone(), record.disaster_type.clone()), index);
        self.forecasts.push(record);
        self.stats.forecasts = self.forecasts.len();
    }

    pub fn stats(&self) -> LoadStats {
        self.stats
    }

    /// All accepted prediction rows
    pub fn predictions(&self) -> &[PredictionRecord] {
        &self.predictions
    }

    /// All forecast records
    pub fn forecasts(&self) -> &[ForecastRecord] {
        &self.forecasts
    }

    /// All (disaster, county) scenarios
    pub fn scenarios(&self) -> &[PredictionEntry] {
        &self.entries
    }

    /// Prediction rows for one (state, disaster type)
    pub fn predictions_for(&self, state: &str, disaster_type: &str) -> impl Iterator<Item = &PredictionRecord> {
        self.predictions_by_state
            .get(&(state.to_string(), disaster_type.to_string()))
            .into_iter()
            .flatten()
            .map(move |&i| &self.predictions[i])
    }

    /// Forecast for one (state, disaster type)
    pub fn forecast(&self, state: &str, disaster_type: &str) -> Option<&ForecastRecord> {
        self.forecasts_by_state
            .get(&(state.to_string(), disaster_type.to_string()))
            .map(|&i| &self.forecasts[i])
    }

    /// Exact scenario for (disaster type, FIPS code)
    pub fn entry(&self, disaster_type: &str, fips_code: &str) -> Option<&PredictionEntry> {
        self.entries_by_fips
            .get(&(disaster_type.to_string(), fips_code.to_string()))
            .map(|&i| &self.entries[i])
    }

    /// Scenarios for every county of one (state, disaster type)
    pub fn entries_for_state(&self, state: &str, disaster_type: &str) -> Vec<&PredictionEntry> {
        self.entries_by_state
            .get(&(state.to_string(), disaster_type.to_string()))
            .map(|indexes| indexes.iter().map(|&i| &self.entries[i]).collect())
            .unwrap_or_default()
    }
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| AppError::DataLoad {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Round half away from zero to `places` decimals
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::AnalyticsStore;

    pub const PREDICTIONS: &str = r#"[
        {
            "disaster_type": "hurricane",
            "fips_code": "12086",
            "region": "Miami-Dade County, FL",
            "text": "Tourism-heavy coastal economy.",
            "predictions": {
                "Accommodation & Food": {"job_loss_pct": 30, "recovery_months": 8},
                "Retail": {"job_loss_pct": 20, "recovery_months": 6},
                "Construction": {"job_change_pct": 150, "peak_month": 3}
            }
        },
        {
            "disaster_type": "hurricane",
            "fips_code": "12057",
            "region": "Hillsborough County, FL",
            "predictions": {
                "Accommodation & Food": {"job_loss_pct": 26, "recovery_months": 10},
                "Retail": {"job_loss_pct": 14, "recovery_months": 4},
                "Construction": {"job_change_pct": 110, "peak_month": 5}
            }
        },
        {
            "disaster_type": "hurricane",
            "fips_code": "22071",
            "region": "Orleans Parish, LA",
            "predictions": {
                "Accommodation & Food": {"job_loss_pct": 40, "recovery_months": 20},
                "Construction": {"job_change_pct": 200, "peak_month": 4}
            }
        },
        {
            "disaster_type": "fire",
            "fips_code": "06037",
            "region": "Los Angeles County, CA",
            "predictions": {
                "Retail": {"job_loss_pct": 12, "recovery_months": 5},
                "Construction": {"job_change_pct": 90, "peak_month": 6},
                "Agriculture": {"job_loss_pct": 18, "job_change_pct": 4}
            }
        }
    ]"#;

    pub const FORECASTS: &str = r#"{
        "FL_Hurricane": {
            "model_info": {"total_historical": 48, "peak_months": ["September", "August", "October"], "cv_mae": 0.42},
            "forecast": {
                "dates": ["2026-03", "2026-04", "2026-05", "2026-06", "2026-07", "2026-08", "2026-09", "2026-10", "2026-11", "2026-12", "2027-01", "2027-02", "2027-03"],
                "predicted_counts": [0.1, 0.1, 0.2, 0.5, 0.9, 1.8, 2.4, 1.2, 0.4, 0.1, 0.1, 0.2, 9.0],
                "upper_bound": [0.5, 0.5, 0.7, 1.2, 1.9, 3.1, 4.0, 2.6, 1.1, 0.5, 0.5, 0.7, 12.0]
            }
        },
        "LA_Hurricane": {
            "model_info": {"total_historical": 30, "peak_months": ["August", "September"]},
            "forecast": {"dates": ["2026-03"], "predicted_counts": [0.5], "upper_bound": [1.5]}
        },
        "CA_Fire": {
            "model_info": {"total_historical": 60, "peak_months": ["August"], "cv_mae": 0.8},
            "forecast": {"dates": [], "predicted_counts": [], "upper_bound": []}
        },
        "OK_Severe_Storm": {
            "model_info": {"total_historical": 12, "peak_months": ["May"]},
            "forecast": {"dates": ["2026-03", "2026-04"], "predicted_counts": [0.3, 0.7]}
        }
    }"#;

    pub fn store() -> AnalyticsStore {
        AnalyticsStore::from_json(PREDICTIONS, FORECASTS).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_counts_and_rejections() {
        let store = fixtures::store();
        let stats = store.stats();
        assert_eq!(stats.scenarios, 4);
        // Agriculture row carries both signals and is rejected
        assert_eq!(stats.rejected_rows, 1);
        assert_eq!(stats.prediction_rows, 10);
        assert_eq!(stats.forecasts, 4);

        for row in store.predictions() {
            assert!(row.job_loss_pct.is_some() != row.job_change_pct.is_some());
        }
        assert!(!store.entry("fire", "06037").unwrap().predictions.contains_key("Agriculture"));
    }

    #[test]
    fn test_state_derived_from_fips() {
        let store = fixtures::store();
        let rows: Vec<_> = store.predictions_for("FL", "hurricane").collect();
        assert_eq!(rows.len(), 6);
        assert!(rows.iter().all(|r| r.state == "FL"));
        assert_eq!(store.predictions_for("LA", "hurricane").count(), 2);
        assert_eq!(store.predictions_for("TX", "hurricane").count(), 0);
    }

    #[test]
    fn test_forecast_parsing() {
        let store = fixtures::store();

        let fl = store.forecast("FL", "hurricane").unwrap();
        assert_eq!(fl.total_historical, 48);
        assert_eq!(fl.horizon.len(), HORIZON_MONTHS);
        // Mean of the first twelve counts only
        assert_eq!(fl.avg_next_12, Some(0.667));

        let ca = store.forecast("CA", "fire").unwrap();
        assert_eq!(ca.avg_next_12, None);
        assert!(ca.horizon.is_empty());

        let ok = store.forecast("OK", "severe_storm").unwrap();
        assert_eq!(ok.avg_next_12, Some(0.5));
        assert_eq!(ok.horizon[1].upper_bound, None);
    }

    #[test]
    fn test_numeric_fips_is_zero_padded() {
        let predictions = r#"[{"disaster_type": "Fire", "fips_code": 6037,
            "predictions": {"Retail": {"job_loss_pct": 10}}}]"#;
        let store = AnalyticsStore::from_json(predictions, "{}").unwrap();
        let entry = store.entry("fire", "06037").unwrap();
        assert_eq!(entry.fips_code, "06037");
        assert_eq!(store.predictions()[0].state, "CA");
    }

    #[test]
    fn test_unknown_fips_prefix_never_matches_state() {
        let predictions = r#"[{"disaster_type": "flood", "fips_code": "72001",
            "predictions": {"Retail": {"job_loss_pct": 10}}}]"#;
        let store = AnalyticsStore::from_json(predictions, "{}").unwrap();
        assert_eq!(store.predictions()[0].state, "");
        assert!(store.entries_for_state("", "flood").is_empty());
    }

    #[test]
    fn test_missing_file_is_data_load_error() {
        let err = AnalyticsStore::load(
            Path::new("does/not/exist.json"),
            Path::new("also/missing.json"),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::DataLoad { .. }));
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(2.345, 1), 2.3);
        assert_eq!(round_to(2.35, 0), 2.0);
        assert_eq!(round_to(0.6666, 3), 0.667);
    }
}
