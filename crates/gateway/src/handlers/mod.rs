//! API handlers module

pub mod chat;
pub mod health;
pub mod lookup;

use disastershift_common::analytics::geo;
use disastershift_common::errors::{AppError, Result};

/// Treat absent and blank optional fields alike
pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

pub(crate) fn parse_state(value: &str) -> Result<String> {
    geo::normalize_state(value).ok_or_else(|| {
        AppError::invalid_field("state", format!("'{}' is not a US state code", value))
    })
}

pub(crate) fn parse_fips(value: &str) -> Result<String> {
    if value.len() == 5 && value.bytes().all(|b| b.is_ascii_digit()) {
        Ok(value.to_string())
    } else {
        Err(AppError::invalid_field(
            "fips_code",
            format!("'{}' is not a 5-digit county FIPS code", value),
        ))
    }
}

pub(crate) fn parse_disaster_type(value: &str) -> Result<String> {
    geo::normalize_disaster_type(value).ok_or_else(|| {
        AppError::invalid_field("disaster_type", format!("'{}' is not a disaster type", value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_field_parsing() {
        assert_eq!(parse_state(" fl ").unwrap(), "FL");
        assert_err!(parse_state("Florida"));
        assert_ok!(parse_fips("01001"));
        assert_err!(parse_fips("1001"));
        assert_err!(parse_fips("1200a"));
        assert_eq!(parse_disaster_type("Severe Storm").unwrap(), "severe_storm");
        assert_err!(parse_disaster_type("storm 2"));
        assert_eq!(non_blank(Some("  ".into())), None);
        assert_eq!(non_blank(Some(" FL ".into())).as_deref(), Some("FL"));
    }
}
