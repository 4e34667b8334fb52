//! Static geography and disaster-type tables

/// Two-digit FIPS state prefix to postal code (50 states + DC)
pub const FIPS_STATES: [(&str, &str); 51] = [
    ("01", "AL"), ("02", "AK"), ("04", "AZ"), ("05", "AR"), ("06", "CA"),
    ("08", "CO"), ("09", "CT"), ("10", "DE"), ("11", "DC"), ("12", "FL"),
    ("13", "GA"), ("15", "HI"), ("16", "ID"), ("17", "IL"), ("18", "IN"),
    ("19", "IA"), ("20", "KS"), ("21", "KY"), ("22", "LA"), ("23", "ME"),
    ("24", "MD"), ("25", "MA"), ("26", "MI"), ("27", "MN"), ("28", "MS"),
    ("29", "MO"), ("30", "MT"), ("31", "NE"), ("32", "NV"), ("33", "NH"),
    ("34", "NJ"), ("35", "NM"), ("36", "NY"), ("37", "NC"), ("38", "ND"),
    ("39", "OH"), ("40", "OK"), ("41", "OR"), ("42", "PA"), ("44", "RI"),
    ("45", "SC"), ("46", "SD"), ("47", "TN"), ("48", "TX"), ("49", "UT"),
    ("50", "VT"), ("51", "VA"), ("53", "WA"), ("54", "WV"), ("55", "WI"),
    ("56", "WY"),
];

/// Named multi-state regions, checked in order
pub const REGION_GROUPS: [(&str, &[&str]); 6] = [
    ("southeast", &["FL", "GA", "NC", "SC", "VA", "AL", "MS", "TN"]),
    ("gulf coast", &["FL", "LA", "TX", "MS", "AL"]),
    ("midwest", &["IL", "IN", "MI", "MN", "MO", "OH", "WI"]),
    ("west coast", &["CA", "OR", "WA"]),
    ("northeast", &["NY", "PA", "MA", "CT", "RI"]),
    ("southwest", &["AZ", "TX", "NM", "CO", "UT"]),
];

/// Forecast key suffixes whose lowercase form is not the canonical type
const FORECAST_SUFFIXES: [(&str, &str); 6] = [
    ("Fire", "fire"),
    ("Flood", "flood"),
    ("Hurricane", "hurricane"),
    ("Severe_Storm", "severe_storm"),
    ("Tornado", "tornado"),
    ("Typhoon", "typhoon"),
];

/// State postal code for a county FIPS code
pub fn state_for_fips(fips: &str) -> Option<&'static str> {
    let prefix = fips.get(..2)?;
    FIPS_STATES
        .iter()
        .find(|(code, _)| *code == prefix)
        .map(|(_, state)| *state)
}

/// Whether `code` is one of the 51 valid (uppercase) state codes
pub fn is_valid_state(code: &str) -> bool {
    FIPS_STATES.iter().any(|(_, state)| *state == code)
}

/// Uppercase and validate a caller-supplied state code
pub fn normalize_state(code: &str) -> Option<String> {
    let upper = code.trim().to_ascii_uppercase();
    is_valid_state(&upper).then_some(upper)
}

/// Canonical disaster type: lowercase words joined by underscores
///
/// "Severe Storm", "severe-storm" and "SEVERE_STORM" all become
/// "severe_storm". Returns `None` unless the result is `[a-z_]+`.
pub fn normalize_disaster_type(raw: &str) -> Option<String> {
    let normalized = raw
        .trim()
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|part| !part.is_empty())
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>()
        .join("_");

    let valid = !normalized.is_empty()
        && normalized.chars().all(|c| c.is_ascii_lowercase() || c == '_');
    valid.then_some(normalized)
}

/// Canonical disaster type for a forecast key suffix ("Severe_Storm")
pub fn disaster_type_from_forecast_suffix(suffix: &str) -> String {
    FORECAST_SUFFIXES
        .iter()
        .find(|(key, _)| *key == suffix)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or_else(|| suffix.to_lowercase())
}

/// Human label for a canonical disaster type ("severe_storm" -> "Severe Storm")
pub fn disaster_label(disaster_type: &str) -> String {
    disaster_type
        .split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
