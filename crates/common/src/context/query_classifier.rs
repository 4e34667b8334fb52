//! Query Classifier - maps a question to at most one analytics operation
//!
//! Provides:
//! - Ordered keyword rule tables (first match wins)
//! - State, region and disaster-type extraction from free text
//!
//! Caller-supplied filters always win over anything inferred from the text.
//! Classification is a pure function over static tables.

use crate::analytics::engine::DEFAULT_LIMIT;
use crate::analytics::geo::{self, REGION_GROUPS};
use crate::analytics::AnalyticsOp;
use regex_lite::Regex;
use std::sync::OnceLock;

/// Disaster type assumed for portfolio questions that name none
pub const DEFAULT_PORTFOLIO_DISASTER: &str = "hurricane";

const TOP_RANK_KEYWORDS: &[&str] = &[
    "top 10", "top 5", "top ten", "top five", "top cities", "top states", "top sectors",
    "ranking", "ranked", "rank",
    "which sectors recover fastest", "which sectors recover slowest",
    "fastest recovery", "slowest recovery",
    "most at risk", "highest risk", "least risk", "safest sector",
    "compare sectors", "sector comparison",
];

const SECTOR_RANK_KEYWORDS: &[&str] = &[
    "which sector", "which industry", "recover fastest", "recover slowest", "recover quickest",
    "quickest recovery", "worst hit", "hardest hit", "most affected", "least affected", "bounce back",
];

const PORTFOLIO_KEYWORDS: &[&str] = &[
    "portfolio", "southeast", "gulf coast", "west coast", "midwest", "northeast",
    "across our", "across states", "multiple states", "all states",
    "real estate holdings", "our properties", "our exposure",
];

const VARIANCE_KEYWORDS: &[&str] = &[
    "variance", "reliable", "reliability", "confidence", "uncertain", "how accurate",
    "least reliable", "most reliable", "how sure", "how certain",
    "prediction accuracy", "model accuracy",
];

const DEMAND_SURGE_KEYWORDS: &[&str] = &[
    "gain workers", "gain jobs", "gaining jobs", "hiring", "increase jobs",
    "which sectors grow", "which sectors hire", "opportunity after", "benefit from disaster",
    "boom after", "construction boom", "who benefits", "which jobs increase",
];

const PREPOSITION_KEYWORDS: &[&str] = &[
    "pre-position", "preposition", "where should we", "deploy resources", "prioritize retraining",
    "where to focus", "resource allocation", "intervention priority", "forecast risk",
    "next 18 months", "next year risk", "upcoming risk", "prepare for",
];

/// Geographic-scope words that turn a ranking question into a cross-dataset ranking
const SCOPE_WORDS: &[&str] = &[
    "city", "cities", "state", "states", "combined", "overall", "weighted",
    "three", "five", "ten", "twenty",
];

/// Disaster phrases in match order; "wildfire" must precede "fire"
const DISASTER_PHRASES: &[(&str, &str)] = &[
    ("hurricane", "hurricane"),
    ("flood", "flood"),
    ("wildfire", "fire"),
    ("fire", "fire"),
    ("tornado", "tornado"),
    ("earthquake", "earthquake"),
    ("severe storm", "severe_storm"),
    ("storm", "severe_storm"),
];

/// Category a question falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryCategory {
    TopRisk,
    Preposition,
    Portfolio,
    Variance,
    DemandSurge,
    SectorRanking,
}

/// One row of the rule table
struct KeywordRule {
    category: QueryCategory,
    keyword_sets: &'static [&'static [&'static str]],
    requires_scope: bool,
}

/// Precedence order; the first matching rule decides
const RULES: &[KeywordRule] = &[
    KeywordRule {
        category: QueryCategory::TopRisk,
        keyword_sets: &[TOP_RANK_KEYWORDS],
        requires_scope: true,
    },
    KeywordRule {
        category: QueryCategory::Preposition,
        keyword_sets: &[PREPOSITION_KEYWORDS],
        requires_scope: false,
    },
    KeywordRule {
        category: QueryCategory::Portfolio,
        keyword_sets: &[PORTFOLIO_KEYWORDS],
        requires_scope: false,
    },
    KeywordRule {
        category: QueryCategory::Variance,
        keyword_sets: &[VARIANCE_KEYWORDS],
        requires_scope: false,
    },
    KeywordRule {
        category: QueryCategory::DemandSurge,
        keyword_sets: &[DEMAND_SURGE_KEYWORDS],
        requires_scope: false,
    },
    KeywordRule {
        category: QueryCategory::SectorRanking,
        keyword_sets: &[SECTOR_RANK_KEYWORDS, TOP_RANK_KEYWORDS],
        requires_scope: false,
    },
];

fn state_token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b[A-Z]{2}\b").expect("state token pattern is valid"))
}

fn matches_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| text.contains(keyword))
}

/// Scope words are looked for after the ranking phrases themselves are
/// removed, so "top 5" alone does not count as its own scope.
fn has_scope(text: &str, ranking_keywords: &[&str]) -> bool {
    let mut residual = text.to_string();
    for keyword in ranking_keywords {
        if residual.contains(keyword) {
            residual = residual.replace(keyword, " ");
        }
    }

    residual
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .any(|token| SCOPE_WORDS.contains(&token) || token.chars().all(|c| c.is_ascii_digit()))
}

impl KeywordRule {
    fn matches(&self, text: &str) -> bool {
        self.keyword_sets.iter().any(|set| {
            matches_any(text, set) && (!self.requires_scope || has_scope(text, set))
        })
    }
}

/// First rule category matching the question, if any
pub fn categorize(question: &str) -> Option<QueryCategory> {
    let text = question.to_lowercase();
    RULES.iter().find(|rule| rule.matches(&text)).map(|rule| rule.category)
}

/// Valid two-letter state codes written in uppercase in the question
pub fn extract_states(question: &str) -> Vec<String> {
    let mut states: Vec<String> = Vec::new();
    for token in state_token_pattern().find_iter(question) {
        let code = token.as_str();
        if geo::is_valid_state(code) && !states.iter().any(|s| s == code) {
            states.push(code.to_string());
        }
    }
    states
}

/// States of the first named region mentioned in the question
pub fn extract_region_states(question: &str) -> Vec<String> {
    let text = question.to_lowercase();
    REGION_GROUPS
        .iter()
        .find(|(region, _)| text.contains(region))
        .map(|(_, states)| states.iter().map(|s| s.to_string()).collect())
        .unwrap_or_default()
}

/// First disaster type mentioned in the question
pub fn extract_disaster(question: &str) -> Option<String> {
    let text = question.to_lowercase();
    DISASTER_PHRASES
        .iter()
        .find(|(phrase, _)| text.contains(phrase))
        .map(|(_, canonical)| canonical.to_string())
}

/// Choose the analytics operation for a question; `None` means semantic-only
pub fn classify(question: &str, state: Option<&str>, disaster_type: Option<&str>) -> Option<AnalyticsOp> {
    let explicit_disaster = || disaster_type.map(str::to_string).or_else(|| extract_disaster(question));

    match categorize(question)? {
        QueryCategory::TopRisk => Some(AnalyticsOp::TopRiskCombos { limit: DEFAULT_LIMIT }),
        QueryCategory::Preposition => Some(AnalyticsOp::Preposition { limit: DEFAULT_LIMIT }),
        QueryCategory::Portfolio => {
            let mut states = extract_region_states(question);
            if states.is_empty() {
                states = extract_states(question);
            }
            if states.is_empty() {
                return None;
            }
            Some(AnalyticsOp::Portfolio {
                states,
                disaster_type: explicit_disaster().unwrap_or_else(|| DEFAULT_PORTFOLIO_DISASTER.to_string()),
            })
        }
        QueryCategory::Variance => Some(AnalyticsOp::Variance),
        QueryCategory::DemandSurge => Some(AnalyticsOp::DemandSurge {
            disaster_type: explicit_disaster(),
        }),
        QueryCategory::SectorRanking => Some(AnalyticsOp::SectorRanking {
            state: state
                .map(str::to_string)
                .or_else(|| extract_states(question).into_iter().next()),
            disaster_type: explicit_disaster(),
        }),
    }
}
