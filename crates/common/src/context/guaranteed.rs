//! Guaranteed context: forecast and prediction blocks found by direct key
//! lookup, with explicit placeholders when nothing exists.

use crate::analytics::geo::disaster_label;
use crate::analytics::store::HorizonPoint;
use crate::analytics::{lookup_prediction, AnalyticsStore, ForecastRecord, ImpactSignal, PredictionSummary};

pub const FORECAST_PLACEHOLDER: &str = "No frequency forecast available for this state/disaster combination.";
pub const PREDICTION_PLACEHOLDER: &str = "No employment impact prediction available for this scenario.";

fn number(value: f64) -> String {
    format!("{}", value)
}

/// Render one forecast record as a prompt block
pub fn format_forecast(record: &ForecastRecord) -> String {
    let label = disaster_label(&record.disaster_type);
    let mut lines = vec![
        format!("{} Risk Forecast for {}:", label, record.state),
        format!(
            "  Historical record: {} FEMA major disaster declarations in {}",
            record.total_historical, record.state
        ),
    ];

    if !record.peak_months.is_empty() {
        lines.push(format!("  Seasonal peak months: {}", record.peak_months.join(", ")));
        if let [first, .., last] = record.peak_months.as_slice() {
            lines.push(format!("  Highest-risk window for workers: {} to {}", first, last));
        }
    }

    lines.push(match record.avg_next_12 {
        Some(avg) => format!(
            "  Forward forecast: avg {:.1} declaration-months/month over the next 12 months",
            avg
        ),
        None => "  Forward forecast: not available".to_string(),
    });

    if let Some(point) = forecast_peak(&record.horizon) {
        let upper = point
            .upper_bound
            .map_or_else(|| "N/A".to_string(), |u| format!("{:.1}", u));
        lines.push(format!(
            "  Forecast peak month: {} ({:.1} predicted, up to {} in worst case)",
            point.date, point.predicted, upper
        ));
    }

    if let Some(mae) = record.cv_mae {
        lines.push(format!(
            "  Forecast accuracy: ±{:.2} declarations/month (cross-validated)",
            mae
        ));
    }

    lines.join("\n")
}

/// Highest predicted point; the first maximum wins on ties
fn forecast_peak(horizon: &[HorizonPoint]) -> Option<&HorizonPoint> {
    horizon.iter().fold(None::<&HorizonPoint>, |best, point| match best {
        Some(b) if b.predicted >= point.predicted => Some(b),
        _ => Some(point),
    })
}

fn sector_line(sector: &str, signal: &ImpactSignal) -> String {
    match signal {
        ImpactSignal::Loss { job_loss_pct, recovery_months } => format!(
            "    - {}: {}% job displacement expected, recovery in approximately {} months",
            sector,
            number(*job_loss_pct),
            recovery_months.map_or_else(|| "?".to_string(), number)
        ),
        ImpactSignal::Surge { job_change_pct, peak_month } => format!(
            "    - {}: +{}% labor demand surge, peaking around month {} post-disaster",
            sector,
            number(*job_change_pct),
            peak_month.map_or_else(|| "?".to_string(), number)
        ),
    }
}

/// Render one prediction summary as a prompt block
pub fn format_prediction(summary: &PredictionSummary) -> String {
    let mut out = format!(
        "Employment Impact Model - {} event in {}:",
        disaster_label(&summary.disaster_type),
        summary.region
    );
    if let Some(text) = summary.text.as_deref().filter(|t| !t.is_empty()) {
        out.push_str("\n  Model summary: ");
        out.push_str(text);
    }

    if !summary.predictions.is_empty() {
        out.push_str("\n  Sector-level projections:");
        for (sector, signal) in &summary.predictions {
            out.push('\n');
            out.push_str(&sector_line(sector, signal));
        }
    }

    out
}

/// Forecast block for a known (state, disaster type), else the placeholder
pub fn forecast_context(store: &AnalyticsStore, state: Option<&str>, disaster_type: Option<&str>) -> String {
    state
        .zip(disaster_type)
        .and_then(|(state, disaster_type)| store.forecast(state, disaster_type))
        .map(format_forecast)
        .unwrap_or_else(|| FORECAST_PLACEHOLDER.to_string())
}

/// Prediction block for the scenario, else the placeholder
pub fn prediction_context(
    store: &AnalyticsStore,
    disaster_type: Option<&str>,
    fips_code: Option<&str>,
    state: Option<&str>,
) -> String {
    disaster_type
        .and_then(|disaster_type| lookup_prediction(store, disaster_type, fips_code, state))
        .map(|summary| format_prediction(&summary))
        .unwrap_or_else(|| PREDICTION_PLACEHOLDER.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::store::fixtures;

    #[test]
    fn test_forecast_block() {
        let store = fixtures::store();
        let block = forecast_context(&store, Some("FL"), Some("hurricane"));

        assert!(block.starts_with("Hurricane Risk Forecast for FL:"));
        assert!(block.contains("48 FEMA major disaster declarations in FL"));
        assert!(block.contains("Seasonal peak months: September, August, October"));
        assert!(block.contains("Highest-risk window for workers: September to October"));
        assert!(block.contains("avg 0.7 declaration-months/month"));
        // The 13th point (9.0) is outside the retained horizon
        assert!(block.contains("Forecast peak month: 2026-09 (2.4 predicted, up to 4.0 in worst case)"));
        assert!(block.contains("±0.42"));
    }

    #[test]
    fn test_forecast_peak_keeps_first_maximum() {
        let point = |date: &str, predicted: f64| HorizonPoint {
            date: date.to_string(),
            predicted,
            upper_bound: None,
        };
        let horizon = vec![point("2026-07", 1.0), point("2026-08", 2.5), point("2026-09", 2.5)];
        assert_eq!(forecast_peak(&horizon).map(|p| p.date.as_str()), Some("2026-08"));
        assert_eq!(forecast_peak(&[]), None);
    }

    #[test]
    fn test_forecast_without_counts() {
        let store = fixtures::store();
        let block = forecast_context(&store, Some("CA"), Some("fire"));
        assert!(block.contains("Forward forecast: not available"));
        assert!(!block.contains("Highest-risk window"));
        assert!(!block.contains("Forecast peak month"));

        let block = forecast_context(&store, Some("OK"), Some("severe_storm"));
        assert!(block.starts_with("Severe Storm Risk Forecast for OK:"));
        assert!(block.contains("up to N/A in worst case"));
    }

    #[test]
    fn test_placeholders() {
        let store = fixtures::store();
        assert_eq!(forecast_context(&store, Some("TX"), Some("hurricane")), FORECAST_PLACEHOLDER);
        assert_eq!(forecast_context(&store, None, Some("hurricane")), FORECAST_PLACEHOLDER);
        assert_eq!(prediction_context(&store, None, Some("12086"), Some("FL")), PREDICTION_PLACEHOLDER);
        assert_eq!(prediction_context(&store, Some("flood"), None, Some("FL")), PREDICTION_PLACEHOLDER);
    }

    #[test]
    fn test_prediction_block_exact_and_aggregate() {
        let store = fixtures::store();

        let exact = prediction_context(&store, Some("hurricane"), Some("12086"), Some("FL"));
        assert!(exact.starts_with("Employment Impact Model - Hurricane event in Miami-Dade County, FL:"));
        assert!(exact.contains("Model summary: Tourism-heavy coastal economy."));
        assert!(exact.contains("- Retail: 20% job displacement expected, recovery in approximately 6 months"));
        assert!(exact.contains("- Construction: +150% labor demand surge, peaking around month 3 post-disaster"));

        let aggregate = prediction_context(&store, Some("hurricane"), None, Some("FL"));
        assert!(aggregate.contains("FL Statewide (2 counties)"));
        assert!(aggregate.contains("- Accommodation & Food: 28% job displacement expected"));
    }
}
