//! Audience resolution
//!
//! An explicit, recognized audience wins. Otherwise an ordered keyword
//! table runs over the job title and question, defaulting to worker.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Persona lens for the generated answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudienceType {
    Worker,
    Employer,
    Policymaker,
    Investor,
    Insurer,
    Unknown,
}

impl AudienceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudienceType::Worker => "worker",
            AudienceType::Employer => "employer",
            AudienceType::Policymaker => "policymaker",
            AudienceType::Investor => "investor",
            AudienceType::Insurer => "insurer",
            AudienceType::Unknown => "unknown",
        }
    }

    /// Case-insensitive parse; anything unrecognized is `Unknown`
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "worker" => AudienceType::Worker,
            "employer" => AudienceType::Employer,
            "policymaker" => AudienceType::Policymaker,
            "investor" => AudienceType::Investor,
            "insurer" => AudienceType::Insurer,
            _ => AudienceType::Unknown,
        }
    }

    /// Tone and emphasis for the generator
    pub fn guidance(&self) -> &'static str {
        match self {
            AudienceType::Worker | AudienceType::Unknown => {
                "The reader is a worker. Focus on job security, income replacement, benefits they can \
                 claim, and transferable skills. Use plain language and concrete deadlines."
            }
            AudienceType::Employer => {
                "The reader is an employer. Focus on workforce continuity, WARN Act and COBRA \
                 obligations, staffing gaps and when demand is expected to return."
            }
            AudienceType::Policymaker => {
                "The reader is a policymaker. Focus on the scale of displacement across sectors, \
                 timing of peak risk, and where retraining and assistance programs should be targeted."
            }
            AudienceType::Investor => {
                "The reader is an investor. Focus on sector exposure, recovery timelines and the \
                 reliability of the projections. Do not give personalised financial advice."
            }
            AudienceType::Insurer => {
                "The reader is an insurer. Focus on event frequency, seasonal concentration of risk, \
                 business-interruption duration by sector and forecast uncertainty."
            }
        }
    }
}

impl fmt::Display for AudienceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Checked in order; the first table with a hit decides
const AUDIENCE_RULES: &[(AudienceType, &[&str])] = &[
    (
        AudienceType::Insurer,
        &["insurer", "insurance", "underwrit", "actuary", "claims", "premium", "reinsurance"],
    ),
    (
        AudienceType::Investor,
        &["investor", "portfolio", "real estate", "reit", "fund", "asset manager", "holdings", "investment"],
    ),
    (
        AudienceType::Policymaker,
        &[
            "policymaker", "policy", "legislator", "mayor", "governor", "city council",
            "agency", "government", "official", "planner",
        ],
    ),
    (
        AudienceType::Employer,
        &[
            "employer", "business owner", "human resources", "hiring manager",
            "my employees", "our employees", "workforce planning",
        ],
    ),
];

/// Keyword heuristic over the job title and question
pub fn detect_audience(job_title: Option<&str>, question: &str) -> AudienceType {
    let text = format!("{} {}", job_title.unwrap_or_default(), question).to_lowercase();
    AUDIENCE_RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|keyword| text.contains(keyword)))
        .map(|(audience, _)| *audience)
        .unwrap_or(AudienceType::Worker)
}

/// Explicit audience when recognized, else the heuristic
pub fn resolve_audience(explicit: Option<&str>, job_title: Option<&str>, question: &str) -> AudienceType {
    match explicit.map(AudienceType::parse) {
        Some(audience) if audience != AudienceType::Unknown => audience,
        _ => detect_audience(job_title, question),
    }
}
