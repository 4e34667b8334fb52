//! Text rendering of structured analytics results
//!
//! Every renderer returns an empty string for an empty result so callers
//! can treat "" as "no structured context".

use super::engine::{
    DemandSurgeReport, PortfolioReport, PrepositionReport, SectorRanking, StructuredResult, TopRiskReport,
    VarianceRow,
};
use super::geo::disaster_label;

/// Render any structured result
pub fn render(result: &StructuredResult) -> String {
    match result {
        StructuredResult::SectorRanking(r) => render_sector_ranking(r),
        StructuredResult::TopRisk(r) => render_top_risk(r),
        StructuredResult::Portfolio(r) => render_portfolio(r),
        StructuredResult::Variance(rows) => render_variance(rows),
        StructuredResult::DemandSurge(r) => render_demand_surge(r),
        StructuredResult::Preposition(r) => render_preposition(r),
    }
}

fn months(value: Option<f64>) -> String {
    value.map_or_else(|| "unknown".to_string(), |v| format!("{:.0}", v))
}

pub fn render_sector_ranking(ranking: &SectorRanking) -> String {
    if ranking.losses.is_empty() && ranking.surges.is_empty() {
        return String::new();
    }

    let mut out = String::from("Sector Employment Rankings");
    if let (Some(state), Some(disaster)) = (&ranking.state, &ranking.disaster_type) {
        out.push_str(&format!(" - {} {}", state, disaster_label(disaster)));
    }
    out.push_str(":\n");

    if !ranking.losses.is_empty() {
        out.push_str("\nSectors losing jobs (from most to least severe):\n");
        for (i, row) in ranking.losses.iter().enumerate() {
            let recovery = row
                .avg_recovery_months
                .map_or_else(|| "unknown".to_string(), |m| format!("{:.0} months", m));
            out.push_str(&format!(
                "  {}. {:<28} - {:.0}% job loss, recovers in {}\n",
                i + 1,
                row.sector,
                row.avg_loss_pct,
                recovery
            ));
        }
    }

    if !ranking.surges.is_empty() {
        out.push_str("\nSectors gaining workers (demand surge from rebuilding/response):\n");
        for (i, row) in ranking.surges.iter().enumerate() {
            let peak = row
                .avg_peak_month
                .map_or_else(|| "unknown timing".to_string(), |m| format!("month {:.0}", m));
            out.push_str(&format!(
                "  {}. {:<28} - +{:.0}% demand increase, peaks at {}\n",
                i + 1,
                row.sector,
                row.avg_change_pct,
                peak
            ));
        }
    }

    out.trim().to_string()
}

pub fn render_top_risk(report: &TopRiskReport) -> String {
    if report.rows.is_empty() {
        return String::new();
    }

    let mut lines = vec![
        format!("Top {} Highest-Risk State x Sector x Disaster Combinations", report.limit),
        "(Risk Score = Job Loss % x Avg Monthly Disaster Frequency)".to_string(),
        String::new(),
    ];
    for (i, row) in report.rows.iter().enumerate() {
        lines.push(format!(
            "  {:>2}. {} / {} / {}",
            i + 1,
            row.state,
            row.sector,
            disaster_label(&row.disaster_type)
        ));
        lines.push(format!(
            "       Job loss: {:.1}% | Recovery: {} months | Frequency: {:.2} events/month | Risk score: {:.1}",
            row.avg_loss_pct,
            months(row.avg_recovery_months),
            row.frequency_per_month,
            row.risk_score
        ));
    }
    lines.join("\n")
}

pub fn render_portfolio(report: &PortfolioReport) -> String {
    if report.rows.is_empty() {
        return String::new();
    }

    let mut lines = vec![
        format!(
            "Portfolio Workforce Risk - {} exposure across: {}",
            disaster_label(&report.disaster_type),
            report.states.join(", ")
        ),
        String::new(),
    ];
    for row in &report.rows {
        lines.push(format!(
            "  {:<30} avg {:.1}% loss (worst: {:.1}%), {}mo recovery [{} states]",
            row.sector,
            row.avg_loss_pct,
            row.worst_loss_pct,
            months(row.avg_recovery_months),
            report.coverage(row)
        ));
    }
    lines.join("\n")
}

pub fn render_variance(rows: &[VarianceRow]) -> String {
    if rows.is_empty() {
        return String::new();
    }

    let mut lines = vec![
        "Sector Recovery Variance (high range = less reliable predictions):".to_string(),
        String::new(),
    ];
    for (i, row) in rows.iter().enumerate() {
        lines.push(format!(
            "  {:>2}. {:<30} avg {:.1}mo recovery, range: {:.1}mo spread - {} variance ({} data points)",
            i + 1,
            row.sector,
            row.avg_recovery_months,
            row.range_months,
            row.level.as_str(),
            row.data_points
        ));
    }
    lines.join("\n")
}

pub fn render_demand_surge(report: &DemandSurgeReport) -> String {
    if report.rows.is_empty() {
        return String::new();
    }

    let scope = report
        .disaster_type
        .as_deref()
        .map(|d| format!(" after {}", disaster_label(d)))
        .unwrap_or_default();

    let mut lines = vec![
        format!("Sectors gaining workers{} (labor demand increases):", scope),
        String::new(),
    ];
    for row in &report.rows {
        let label = if scope.is_empty() {
            format!(" ({})", disaster_label(&row.disaster_type))
        } else {
            scope.clone()
        };
        let peak = row
            .avg_peak_month
            .map_or_else(|| "unknown timing".to_string(), |m| format!("month {:.0}", m));
        lines.push(format!(
            "  {:<30} +{:.1}% demand surge{}, peaks at {} ({} states)",
            row.sector, row.avg_change_pct, label, peak, row.states
        ));
    }
    lines.join("\n")
}

pub fn render_preposition(report: &PrepositionReport) -> String {
    if report.rows.is_empty() {
        return String::new();
    }

    let mut lines = vec![
        format!("Top {} States/Disasters to Pre-Position Workforce Resources", report.limit),
        "(Ranked by: Forecast Frequency x Average Job Loss = Priority Score)".to_string(),
        String::new(),
    ];
    for (i, row) in report.rows.iter().enumerate() {
        let peaks = if row.peak_months.is_empty() {
            String::new()
        } else {
            format!(", peak: {}", row.peak_months.join(", "))
        };
        lines.push(format!(
            "  {:>2}. {} - {}{}",
            i + 1,
            row.state,
            disaster_label(&row.disaster_type),
            peaks
        ));
        lines.push(format!(
            "       Frequency: {:.2} events/month | Avg job loss: {:.1}% | Priority: {:.1}",
            row.frequency_per_month, row.avg_loss_pct, row.priority_score
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::engine::{AnalyticsEngine, AnalyticsOp};
    use crate::analytics::store::fixtures;
    use std::sync::Arc;

    fn engine() -> AnalyticsEngine {
        AnalyticsEngine::new(Arc::new(fixtures::store()))
    }

    #[test]
    fn test_empty_results_render_empty() {
        let engine = engine();
        let ops = [
            AnalyticsOp::SectorRanking {
                state: Some("WY".into()),
                disaster_type: Some("flood".into()),
            },
            AnalyticsOp::Portfolio {
                states: vec!["NY".into()],
                disaster_type: "hurricane".into(),
            },
            AnalyticsOp::DemandSurge {
                disaster_type: Some("earthquake".into()),
            },
            AnalyticsOp::TopRiskCombos { limit: 0 },
        ];
        for op in &ops {
            assert_eq!(render(&engine.execute(op)), "", "{:?}", op);
        }
    }

    #[test]
    fn test_sector_ranking_text() {
        let text = render_sector_ranking(&engine().sector_ranking(Some("FL"), Some("hurricane")));
        assert!(text.starts_with("Sector Employment Rankings - FL Hurricane:"));
        let first = text.lines().find(|l| l.trim_start().starts_with("1.")).unwrap();
        assert!(first.contains("Accommodation & Food"));
        assert!(first.contains("28% job loss, recovers in 9 months"));
        assert!(text.contains("+130% demand increase, peaks at month 4"));
    }

    #[test]
    fn test_portfolio_text_shows_coverage() {
        let engine = engine();
        let report = engine.portfolio(&["FL".to_string(), "TX".to_string()], "hurricane");
        let text = render_portfolio(&report);
        assert!(text.starts_with("Portfolio Workforce Risk - Hurricane exposure across: FL, TX"));
        assert!(text.contains("[1/2 states]"));
    }

    #[test]
    fn test_variance_text() {
        let text = render_variance(&engine().variance());
        assert!(text.contains("HIGH variance (3 data points)"));
    }

    #[test]
    fn test_preposition_text() {
        let text = render_preposition(&engine().preposition(10));
        assert!(text.contains("FL - Hurricane, peak: September, August"));
        assert!(text.contains("Priority: 20.0"));
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let engine = engine();
        let op = AnalyticsOp::TopRiskCombos { limit: 10 };
        assert_eq!(render(&engine.execute(&op)), render(&engine.execute(&op)));
    }
}
