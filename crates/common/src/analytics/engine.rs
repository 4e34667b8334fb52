//! Analytics Engine - deterministic aggregations over the Analytics Store
//!
//! Provides six read-only operations returning typed, ranked rows:
//! - Sector ranking (loss and surge)
//! - Weighted top-risk (state, sector, disaster) combinations
//! - Portfolio aggregation over a list of states
//! - Recovery variance / prediction reliability
//! - Demand-surge ranking
//! - Pre-positioning priority
//!
//! "No rows" is a normal outcome: every operation returns an empty result
//! rather than an error. Rendering lives in [`super::render`].

use super::store::{round_to, AnalyticsStore, PredictionRecord};
use crate::metrics;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

/// Default row limit for the ranked cross-dataset operations
pub const DEFAULT_LIMIT: usize = 10;

/// Variance ranges above this are HIGH
pub const HIGH_VARIANCE_MONTHS: f64 = 9.0;
/// Variance ranges above this are MEDIUM
pub const MEDIUM_VARIANCE_MONTHS: f64 = 4.0;

/// One structured analytics operation chosen by the classifier
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AnalyticsOp {
    TopRiskCombos { limit: usize },
    Preposition { limit: usize },
    Portfolio { states: Vec<String>, disaster_type: String },
    Variance,
    DemandSurge { disaster_type: Option<String> },
    SectorRanking { state: Option<String>, disaster_type: Option<String> },
}

impl AnalyticsOp {
    pub fn name(&self) -> &'static str {
        match self {
            AnalyticsOp::TopRiskCombos { .. } => "top_risk_combos",
            AnalyticsOp::Preposition { .. } => "preposition",
            AnalyticsOp::Portfolio { .. } => "portfolio",
            AnalyticsOp::Variance => "variance",
            AnalyticsOp::DemandSurge { .. } => "demand_surge",
            AnalyticsOp::SectorRanking { .. } => "sector_ranking",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LossRow {
    pub sector: String,
    pub avg_loss_pct: f64,
    pub avg_recovery_months: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurgeRow {
    pub sector: String,
    pub avg_change_pct: f64,
    pub avg_peak_month: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectorRanking {
    pub state: Option<String>,
    pub disaster_type: Option<String>,
    /// Most to least severe
    pub losses: Vec<LossRow>,
    /// Largest to smallest demand increase
    pub surges: Vec<SurgeRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskCombo {
    pub state: String,
    pub sector: String,
    pub disaster_type: String,
    pub avg_loss_pct: f64,
    pub avg_recovery_months: Option<f64>,
    pub frequency_per_month: f64,
    pub risk_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopRiskReport {
    pub limit: usize,
    pub rows: Vec<RiskCombo>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioRow {
    pub sector: String,
    pub avg_loss_pct: f64,
    pub worst_loss_pct: f64,
    pub avg_recovery_months: Option<f64>,
    pub states_covered: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioReport {
    pub disaster_type: String,
    pub states: Vec<String>,
    pub rows: Vec<PortfolioRow>,
}

impl PortfolioReport {
    /// Coverage of `row` against the requested states, e.g. "1/2"
    pub fn coverage(&self, row: &PortfolioRow) -> String {
        format!("{}/{}", row.states_covered, self.states.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VarianceLevel {
    High,
    Medium,
    Low,
}

impl VarianceLevel {
    pub fn from_range(range_months: f64) -> Self {
        if range_months > HIGH_VARIANCE_MONTHS {
            VarianceLevel::High
        } else if range_months > MEDIUM_VARIANCE_MONTHS {
            VarianceLevel::Medium
        } else {
            VarianceLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VarianceLevel::High => "HIGH",
            VarianceLevel::Medium => "MEDIUM",
            VarianceLevel::Low => "LOW",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VarianceRow {
    pub sector: String,
    pub avg_recovery_months: f64,
    pub range_months: f64,
    pub avg_loss_pct: Option<f64>,
    pub data_points: usize,
    pub level: VarianceLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DemandSurgeRow {
    pub sector: String,
    pub disaster_type: String,
    pub avg_change_pct: f64,
    pub avg_peak_month: Option<f64>,
    pub states: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DemandSurgeReport {
    pub disaster_type: Option<String>,
    pub rows: Vec<DemandSurgeRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrepositionRow {
    pub state: String,
    pub disaster_type: String,
    pub frequency_per_month: f64,
    pub peak_months: Vec<String>,
    pub avg_loss_pct: f64,
    pub priority_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrepositionReport {
    pub limit: usize,
    pub rows: Vec<PrepositionRow>,
}

/// Typed output of one analytics operation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "result", rename_all = "snake_case")]
pub enum StructuredResult {
    SectorRanking(SectorRanking),
    TopRisk(TopRiskReport),
    Portfolio(PortfolioReport),
    Variance(Vec<VarianceRow>),
    DemandSurge(DemandSurgeReport),
    Preposition(PrepositionReport),
}

impl StructuredResult {
    pub fn row_count(&self) -> usize {
        match self {
            StructuredResult::SectorRanking(r) => r.losses.len() + r.surges.len(),
            StructuredResult::TopRisk(r) => r.rows.len(),
            StructuredResult::Portfolio(r) => r.rows.len(),
            StructuredResult::Variance(rows) => rows.len(),
            StructuredResult::DemandSurge(r) => r.rows.len(),
            StructuredResult::Preposition(r) => r.rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }
}

/// Running mean that ignores absent values
#[derive(Debug, Default, Clone, Copy)]
struct Mean {
    sum: f64,
    count: usize,
}

impl Mean {
    fn push(&mut self, value: Option<f64>) {
        if let Some(v) = value {
            self.sum += v;
            self.count += 1;
        }
    }

    fn get(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

fn descending(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

/// Engine over a shared, read-only store
#[derive(Debug, Clone)]
pub struct AnalyticsEngine {
    store: Arc<AnalyticsStore>,
}

impl AnalyticsEngine {
    pub fn new(store: Arc<AnalyticsStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &AnalyticsStore {
        &self.store
    }

    /// Run one operation, recording latency and row counts
    pub fn execute(&self, op: &AnalyticsOp) -> StructuredResult {
        let start = Instant::now();

        let result = match op {
            AnalyticsOp::SectorRanking { state, disaster_type } => {
                StructuredResult::SectorRanking(self.sector_ranking(state.as_deref(), disaster_type.as_deref()))
            }
            AnalyticsOp::TopRiskCombos { limit } => StructuredResult::TopRisk(self.top_risk_combos(*limit)),
            AnalyticsOp::Portfolio { states, disaster_type } => {
                StructuredResult::Portfolio(self.portfolio(states, disaster_type))
            }
            AnalyticsOp::Variance => StructuredResult::Variance(self.variance()),
            AnalyticsOp::DemandSurge { disaster_type } => {
                StructuredResult::DemandSurge(self.demand_surge(disaster_type.as_deref()))
            }
            AnalyticsOp::Preposition { limit } => StructuredResult::Preposition(self.preposition(*limit)),
        };

        let rows = result.row_count();
        metrics::record_analytics(start.elapsed().as_secs_f64(), op.name(), rows);
        tracing::debug!(op = op.name(), rows = rows, "Analytics operation complete");

        result
    }

    fn rows_matching<'a>(
        &'a self,
        state: Option<&'a str>,
        disaster_type: Option<&'a str>,
    ) -> Box<dyn Iterator<Item = &'a PredictionRecord> + 'a> {
        match (state, disaster_type) {
            (Some(state), Some(disaster_type)) => Box::new(self.store.predictions_for(state, disaster_type)),
            _ => Box::new(self.store.predictions().iter().filter(move |row| {
                state.map_or(true, |s| row.state == s)
                    && disaster_type.map_or(true, |d| row.disaster_type == d)
            })),
        }
    }

    /// Sectors by mean loss and by mean demand surge
    pub fn sector_ranking(&self, state: Option<&str>, disaster_type: Option<&str>) -> SectorRanking {
        let mut losses: BTreeMap<&str, (Mean, Mean)> = BTreeMap::new();
        let mut surges: BTreeMap<&str, (Mean, Mean)> = BTreeMap::new();

        for row in self.rows_matching(state, disaster_type) {
            if row.job_loss_pct.is_some() {
                let (loss, recovery) = losses.entry(&row.sector).or_default();
                loss.push(row.job_loss_pct);
                recovery.push(row.recovery_months);
            }
            if row.job_change_pct.is_some() {
                let (change, peak) = surges.entry(&row.sector).or_default();
                change.push(row.job_change_pct);
                peak.push(row.peak_month);
            }
        }

        let mut loss_rows: Vec<LossRow> = losses
            .into_iter()
            .filter_map(|(sector, (loss, recovery))| {
                Some(LossRow {
                    sector: sector.to_string(),
                    avg_loss_pct: loss.get()?,
                    avg_recovery_months: recovery.get(),
                })
            })
            .collect();
        loss_rows.sort_by(|a, b| descending(a.avg_loss_pct, b.avg_loss_pct).then_with(|| a.sector.cmp(&b.sector)));

        let mut surge_rows: Vec<SurgeRow> = surges
            .into_iter()
            .filter_map(|(sector, (change, peak))| {
                Some(SurgeRow {
                    sector: sector.to_string(),
                    avg_change_pct: change.get()?,
                    avg_peak_month: peak.get(),
                })
            })
            .collect();
        surge_rows
            .sort_by(|a, b| descending(a.avg_change_pct, b.avg_change_pct).then_with(|| a.sector.cmp(&b.sector)));

        SectorRanking {
            state: state.map(str::to_string),
            disaster_type: disaster_type.map(str::to_string),
            losses: loss_rows,
            surges: surge_rows,
        }
    }

    /// Mean loss x forecast frequency per (state, sector, disaster)
    ///
    /// Rows without a loss value or without a forecast frequency are left
    /// out of the join rather than scored as zero.
    pub fn top_risk_combos(&self, limit: usize) -> TopRiskReport {
        let mut groups: BTreeMap<(&str, &str, &str), (Mean, Mean, f64)> = BTreeMap::new();

        for row in self.store.predictions() {
            if row.job_loss_pct.is_none() {
                continue;
            }
            let Some(frequency) = self
                .store
                .forecast(&row.state, &row.disaster_type)
                .and_then(|f| f.avg_next_12)
            else {
                continue;
            };

            let (loss, recovery, _) = groups
                .entry((row.state.as_str(), row.sector.as_str(), row.disaster_type.as_str()))
                .or_insert((Mean::default(), Mean::default(), frequency));
            loss.push(row.job_loss_pct);
            recovery.push(row.recovery_months);
        }

        let mut rows: Vec<RiskCombo> = groups
            .into_iter()
            .filter_map(|((state, sector, disaster_type), (loss, recovery, frequency))| {
                let avg_loss = loss.get()?;
                Some(RiskCombo {
                    state: state.to_string(),
                    sector: sector.to_string(),
                    disaster_type: disaster_type.to_string(),
                    avg_loss_pct: avg_loss,
                    avg_recovery_months: recovery.get(),
                    frequency_per_month: frequency,
                    risk_score: avg_loss * frequency,
                })
            })
            .collect();

        // Stable sort keeps the (state, sector, disaster) order among ties
        rows.sort_by(|a, b| descending(a.risk_score, b.risk_score));
        rows.truncate(limit);

        TopRiskReport { limit, rows }
    }

    /// Sector exposure across a portfolio of states for one disaster type
    pub fn portfolio(&self, states: &[String], disaster_type: &str) -> PortfolioReport {
        let mut requested: Vec<String> = Vec::with_capacity(states.len());
        for state in states {
            let state = state.to_ascii_uppercase();
            if !requested.contains(&state) {
                requested.push(state);
            }
        }

        let mut groups: BTreeMap<&str, (Mean, f64, Mean, BTreeSet<&str>)> = BTreeMap::new();
        for state in &requested {
            for row in self.store.predictions_for(state, disaster_type) {
                let Some(loss) = row.job_loss_pct else { continue };
                let (avg, worst, recovery, covered) = groups
                    .entry(&row.sector)
                    .or_insert((Mean::default(), f64::MIN, Mean::default(), BTreeSet::new()));
                avg.push(Some(loss));
                *worst = worst.max(loss);
                recovery.push(row.recovery_months);
                covered.insert(&row.state);
            }
        }

        let mut rows: Vec<PortfolioRow> = groups
            .into_iter()
            .filter_map(|(sector, (avg, worst, recovery, covered))| {
                Some(PortfolioRow {
                    sector: sector.to_string(),
                    avg_loss_pct: avg.get()?,
                    worst_loss_pct: worst,
                    avg_recovery_months: recovery.get(),
                    states_covered: covered.len(),
                })
            })
            .collect();
        rows.sort_by(|a, b| descending(a.avg_loss_pct, b.avg_loss_pct));

        PortfolioReport {
            disaster_type: disaster_type.to_string(),
            states: requested,
            rows,
        }
    }

    /// Spread of recovery months per sector; sectors need two data points
    pub fn variance(&self) -> Vec<VarianceRow> {
        let mut groups: BTreeMap<&str, (Vec<f64>, Mean)> = BTreeMap::new();
        for row in self.store.predictions() {
            let Some(recovery) = row.recovery_months else { continue };
            let (samples, loss) = groups.entry(&row.sector).or_default();
            samples.push(recovery);
            loss.push(row.job_loss_pct);
        }

        let mut rows: Vec<VarianceRow> = groups
            .into_iter()
            .filter(|(_, (samples, _))| samples.len() >= 2)
            .map(|(sector, (samples, loss))| {
                let max = samples.iter().copied().fold(f64::MIN, f64::max);
                let min = samples.iter().copied().fold(f64::MAX, f64::min);
                let range = max - min;
                VarianceRow {
                    sector: sector.to_string(),
                    avg_recovery_months: samples.iter().sum::<f64>() / samples.len() as f64,
                    range_months: range,
                    avg_loss_pct: loss.get(),
                    data_points: samples.len(),
                    // Classified on the displayed precision
                    level: VarianceLevel::from_range(round_to(range, 1)),
                }
            })
            .collect();
        rows.sort_by(|a, b| descending(a.range_months, b.range_months));

        rows
    }

    /// Sectors gaining workers, per (sector, disaster type)
    pub fn demand_surge(&self, disaster_type: Option<&str>) -> DemandSurgeReport {
        let mut groups: BTreeMap<(&str, &str), (Mean, Mean, BTreeSet<&str>)> = BTreeMap::new();
        for row in self.rows_matching(None, disaster_type) {
            if row.job_change_pct.is_none() {
                continue;
            }
            let (change, peak, states) = groups.entry((row.sector.as_str(), row.disaster_type.as_str())).or_default();
            change.push(row.job_change_pct);
            peak.push(row.peak_month);
            if !row.state.is_empty() {
                states.insert(&row.state);
            }
        }

        let mut rows: Vec<DemandSurgeRow> = groups
            .into_iter()
            .filter_map(|((sector, disaster), (change, peak, states))| {
                Some(DemandSurgeRow {
                    sector: sector.to_string(),
                    disaster_type: disaster.to_string(),
                    avg_change_pct: change.get()?,
                    avg_peak_month: peak.get(),
                    states: states.len(),
                })
            })
            .collect();
        rows.sort_by(|a, b| descending(a.avg_change_pct, b.avg_change_pct));

        DemandSurgeReport {
            disaster_type: disaster_type.map(str::to_string),
            rows,
        }
    }

    /// Forecast frequency x mean loss per (state, disaster type)
    pub fn preposition(&self, limit: usize) -> PrepositionReport {
        let mut rows: Vec<PrepositionRow> = self
            .store
            .forecasts()
            .iter()
            .filter_map(|forecast| {
                let frequency = forecast.avg_next_12.filter(|f| *f > 0.0)?;
                let mut loss = Mean::default();
                for row in self.store.predictions_for(&forecast.state, &forecast.disaster_type) {
                    loss.push(row.job_loss_pct);
                }
                let avg_loss = loss.get()?;
                Some(PrepositionRow {
                    state: forecast.state.clone(),
                    disaster_type: forecast.disaster_type.clone(),
                    frequency_per_month: frequency,
                    peak_months: forecast.peak_months.iter().take(2).cloned().collect(),
                    avg_loss_pct: avg_loss,
                    priority_score: frequency * avg_loss,
                })
            })
            .collect();

        rows.sort_by(|a, b| {
            descending(a.priority_score, b.priority_score)
                .then_with(|| a.state.cmp(&b.state))
                .then_with(|| a.disaster_type.cmp(&b.disaster_type))
        });
        rows.truncate(limit);

        PrepositionReport { limit, rows }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::store::fixtures;

    fn engine() -> AnalyticsEngine {
        AnalyticsEngine::new(Arc::new(fixtures::store()))
    }

    #[test]
    fn test_sector_ranking_orders_by_mean_loss() {
        let ranking = engine().sector_ranking(Some("FL"), Some("hurricane"));
        let sectors: Vec<_> = ranking.losses.iter().map(|r| r.sector.as_str()).collect();
        assert_eq!(sectors, vec!["Accommodation & Food", "Retail"]);
        assert_eq!(ranking.losses[0].avg_loss_pct, 28.0);
        assert_eq!(ranking.losses[0].avg_recovery_months, Some(9.0));
        assert_eq!(ranking.surges[0].sector, "Construction");
        assert_eq!(ranking.surges[0].avg_change_pct, 130.0);
    }

    #[test]
    fn test_sector_ranking_empty_for_unknown_scenario() {
        let result = engine().execute(&AnalyticsOp::SectorRanking {
            state: Some("WY".into()),
            disaster_type: Some("tornado".into()),
        });
        assert!(result.is_empty());
    }

    #[test]
    fn test_top_risk_combos_sorted_and_limited() {
        let report = engine().top_risk_combos(2);
        assert!(report.rows.len() <= 2);
        for pair in report.rows.windows(2) {
            assert!(pair[0].risk_score >= pair[1].risk_score);
        }
        // LA: 40 x 0.5 = 20.0 beats FL: 28 x 0.667
        assert_eq!(report.rows[0].state, "LA");
        assert_eq!(report.rows[0].risk_score, 20.0);
        assert_eq!(report.rows[1].state, "FL");
        assert!((report.rows[1].risk_score - 28.0 * 0.667).abs() < 1e-9);
    }

    #[test]
    fn test_top_risk_excludes_missing_frequency() {
        // CA fire has no predicted counts, so its Retail loss is excluded
        let report = engine().top_risk_combos(DEFAULT_LIMIT);
        assert!(report.rows.iter().all(|r| r.state != "CA"));
        assert_eq!(report.rows.len(), 3);
    }

    #[test]
    fn test_portfolio_reports_partial_coverage() {
        let engine = engine();
        let report = engine.portfolio(&["FL".to_string(), "TX".to_string()], "hurricane");
        assert_eq!(report.rows[0].sector, "Accommodation & Food");
        assert_eq!(report.coverage(&report.rows[0]), "1/2");

        let report = engine.portfolio(&["FL".to_string(), "LA".to_string(), "fl".to_string()], "hurricane");
        assert_eq!(report.states, vec!["FL", "LA"]);
        let accommodation = &report.rows[0];
        assert_eq!(accommodation.worst_loss_pct, 40.0);
        assert_eq!(report.coverage(accommodation), "2/2");
    }

    #[test]
    fn test_variance_requires_two_points() {
        let rows = engine().variance();
        assert!(rows.iter().all(|r| r.data_points >= 2));
        let accommodation = rows.iter().find(|r| r.sector == "Accommodation & Food").unwrap();
        assert_eq!(accommodation.range_months, 12.0);
        assert_eq!(accommodation.level, VarianceLevel::High);
        let retail = rows.iter().find(|r| r.sector == "Retail").unwrap();
        assert_eq!(retail.range_months, 2.0);
        assert_eq!(retail.level, VarianceLevel::Low);
    }

    #[test]
    fn test_variance_skips_single_sample_sectors() {
        let predictions = r#"[
            {
                "disaster_type": "flood",
                "fips_code": "29095",
                "region": "Jackson County, MO",
                "predictions": {
                    "Utilities": {"job_loss_pct": 9, "recovery_months": 3},
                    "Retail": {"job_loss_pct": 15, "recovery_months": 5}
                }
            },
            {
                "disaster_type": "flood",
                "fips_code": "29189",
                "region": "St. Louis County, MO",
                "predictions": {
                    "Retail": {"job_loss_pct": 11, "recovery_months": 9},
                    "Manufacturing": {"job_loss_pct": 7}
                }
            }
        ]"#;
        let store = AnalyticsStore::from_json(predictions, "{}").unwrap();
        let rows = AnalyticsEngine::new(Arc::new(store)).variance();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].sector, "Retail");
        assert_eq!(rows[0].data_points, 2);
        assert_eq!(rows[0].range_months, 4.0);
        assert_eq!(rows[0].avg_recovery_months, 7.0);
        assert!(!rows.iter().any(|r| r.sector == "Utilities" || r.sector == "Manufacturing"));
    }

    #[test]
    fn test_variance_levels() {
        assert_eq!(VarianceLevel::from_range(9.1), VarianceLevel::High);
        assert_eq!(VarianceLevel::from_range(9.0), VarianceLevel::Medium);
        assert_eq!(VarianceLevel::from_range(4.0), VarianceLevel::Low);
    }

    #[test]
    fn test_demand_surge_filters_disaster() {
        let engine = engine();
        let all = engine.demand_surge(None);
        assert_eq!(all.rows.len(), 2);
        assert_eq!(all.rows[0].disaster_type, "hurricane");
        assert_eq!(all.rows[0].states, 2);

        let fire = engine.demand_surge(Some("fire"));
        assert_eq!(fire.rows.len(), 1);
        assert_eq!(fire.rows[0].avg_change_pct, 90.0);
    }

    #[test]
    fn test_preposition_priority() {
        let report = engine().preposition(DEFAULT_LIMIT);
        // CA has no frequency; OK has no loss rows
        let keys: Vec<_> = report.rows.iter().map(|r| r.state.as_str()).collect();
        assert_eq!(keys, vec!["LA", "FL"]);
        assert_eq!(report.rows[1].peak_months, vec!["September", "August"]);
    }

    #[test]
    fn test_idempotent() {
        let engine = engine();
        assert_eq!(engine.top_risk_combos(10), engine.top_risk_combos(10));
        assert_eq!(engine.variance(), engine.variance());
    }
}
