//! Direct-key lookups behind the guaranteed context and the prediction API

use super::geo;
use super::store::{round_to, AnalyticsStore, PredictionEntry};
use serde::Serialize;
use std::collections::BTreeMap;

const DEFAULT_RECOVERY_MONTHS: f64 = 12.0;
const DEFAULT_PEAK_MONTH: f64 = 3.0;

/// Employment-impact signal for one sector
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ImpactSignal {
    Loss {
        job_loss_pct: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        recovery_months: Option<f64>,
    },
    Surge {
        job_change_pct: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        peak_month: Option<f64>,
    },
}

/// Prediction for one scenario, exact or aggregated over a state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionSummary {
    pub disaster_type: String,
    /// `None` for a state aggregate
    pub fips_code: Option<String>,
    pub region: String,
    pub text: Option<String>,
    pub predictions: BTreeMap<String, ImpactSignal>,
}

impl PredictionSummary {
    fn from_entry(entry: &PredictionEntry) -> Self {
        let predictions = entry
            .predictions
            .iter()
            .filter_map(|(sector, values)| {
                let signal = match (values.job_loss_pct, values.job_change_pct) {
                    (Some(loss), None) => ImpactSignal::Loss {
                        job_loss_pct: loss,
                        recovery_months: values.recovery_months,
                    },
                    (None, Some(change)) => ImpactSignal::Surge {
                        job_change_pct: change,
                        peak_month: values.peak_month,
                    },
                    _ => return None,
                };
                Some((sector.clone(), signal))
            })
            .collect();

        Self {
            disaster_type: entry.disaster_type.clone(),
            fips_code: Some(entry.fips_code.clone()),
            region: entry.region.clone().unwrap_or_else(|| entry.fips_code.clone()),
            text: entry.text.clone(),
            predictions,
        }
    }
}

#[derive(Default)]
struct SectorSamples {
    losses: Vec<f64>,
    recoveries: Vec<f64>,
    gains: Vec<f64>,
    peaks: Vec<f64>,
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

/// Average every county scenario of one (disaster type, state)
///
/// Per sector, whichever signal appears more often wins (loss on ties).
pub fn aggregate_state(store: &AnalyticsStore, disaster_type: &str, state: &str) -> Option<PredictionSummary> {
    let entries = store.entries_for_state(state, disaster_type);
    if entries.is_empty() {
        return None;
    }

    let mut samples: BTreeMap<&str, SectorSamples> = BTreeMap::new();
    for entry in &entries {
        for (sector, values) in &entry.predictions {
            let slot = samples.entry(sector.as_str()).or_default();
            if let Some(loss) = values.job_loss_pct {
                slot.losses.push(loss);
                slot.recoveries.extend(values.recovery_months);
            }
            if let Some(gain) = values.job_change_pct {
                slot.gains.push(gain);
                slot.peaks.extend(values.peak_month);
            }
        }
    }

    let predictions = samples
        .into_iter()
        .filter_map(|(sector, s)| {
            let signal = if !s.losses.is_empty() && s.losses.len() >= s.gains.len() {
                ImpactSignal::Loss {
                    job_loss_pct: round_to(mean(&s.losses)?, 1),
                    recovery_months: Some(mean(&s.recoveries).map_or(DEFAULT_RECOVERY_MONTHS, f64::round)),
                }
            } else {
                ImpactSignal::Surge {
                    job_change_pct: round_to(mean(&s.gains)?, 1),
                    peak_month: Some(mean(&s.peaks).map_or(DEFAULT_PEAK_MONTH, f64::round)),
                }
            };
            Some((sector.to_string(), signal))
        })
        .collect();

    Some(PredictionSummary {
        disaster_type: disaster_type.to_string(),
        fips_code: None,
        region: format!("{} Statewide ({} counties)", state, entries.len()),
        text: Some(format!(
            "Aggregated {} impact across {} counties in {}. Values represent statewide averages.",
            geo::disaster_label(disaster_type),
            entries.len(),
            state
        )),
        predictions,
    })
}

/// Exact (disaster type, FIPS) scenario, else the state aggregate
pub fn lookup_prediction(
    store: &AnalyticsStore,
    disaster_type: &str,
    fips_code: Option<&str>,
    state: Option<&str>,
) -> Option<PredictionSummary> {
    if let Some(entry) = fips_code.and_then(|fips| store.entry(disaster_type, fips)) {
        return Some(PredictionSummary::from_entry(entry));
    }

    // A FIPS code without a state still names one
    let state = state.or_else(|| fips_code.and_then(geo::state_for_fips))?;
    aggregate_state(store, disaster_type, state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::store::fixtures;

    #[test]
    fn test_exact_lookup() {
        let store = fixtures::store();
        let summary = lookup_prediction(&store, "hurricane", Some("12086"), Some("FL")).unwrap();
        assert_eq!(summary.fips_code.as_deref(), Some("12086"));
        assert_eq!(summary.region, "Miami-Dade County, FL");
        assert_eq!(
            summary.predictions["Retail"],
            ImpactSignal::Loss {
                job_loss_pct: 20.0,
                recovery_months: Some(6.0)
            }
        );
    }

    #[test]
    fn test_state_fallback_aggregates_counties() {
        let store = fixtures::store();
        // Unknown county falls back to its state
        let summary = lookup_prediction(&store, "hurricane", Some("12999"), None).unwrap();
        assert_eq!(summary.fips_code, None);
        assert_eq!(summary.region, "FL Statewide (2 counties)");
        assert_eq!(
            summary.predictions["Accommodation & Food"],
            ImpactSignal::Loss {
                job_loss_pct: 28.0,
                recovery_months: Some(9.0)
            }
        );
        assert_eq!(
            summary.predictions["Construction"],
            ImpactSignal::Surge {
                job_change_pct: 130.0,
                peak_month: Some(4.0)
            }
        );
    }

    #[test]
    fn test_defaults_when_timing_missing() {
        let predictions = r#"[{"disaster_type": "flood", "fips_code": "48201",
            "predictions": {"Retail": {"job_loss_pct": 9}, "Construction": {"job_change_pct": 40}}}]"#;
        let store = AnalyticsStore::from_json(predictions, "{}").unwrap();
        let summary = aggregate_state(&store, "flood", "TX").unwrap();
        assert_eq!(
            summary.predictions["Retail"],
            ImpactSignal::Loss {
                job_loss_pct: 9.0,
                recovery_months: Some(12.0)
            }
        );
        assert_eq!(
            summary.predictions["Construction"],
            ImpactSignal::Surge {
                job_change_pct: 40.0,
                peak_month: Some(3.0)
            }
        );
    }

    #[test]
    fn test_nothing_qualifies() {
        let store = fixtures::store();
        assert!(lookup_prediction(&store, "tornado", None, Some("FL")).is_none());
        assert!(lookup_prediction(&store, "hurricane", None, None).is_none());
    }
}
