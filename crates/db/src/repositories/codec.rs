//! Shared storage encodings: RFC3339 timestamps at fixed precision (so
//! TEXT comparison matches chronological order), JSON-array TEXT columns
//! and integer booleans.

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;

use super::RepositoryError;

pub(crate) fn encode_ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn encode_opt_ts(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(encode_ts)
}

pub(crate) fn parse_ts(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|ts| ts.with_timezone(&Utc)).map_err(|error| {
        RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
    })
}

pub(crate) fn parse_opt_ts(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|ts| parse_ts(column, ts)).transpose()
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

pub(crate) fn parse_decimal(column: &str, value: String) -> Result<Decimal, RepositoryError> {
    value.parse().map_err(|_| {
        RepositoryError::Decode(format!("invalid decimal in `{column}`: `{value}`"))
    })
}

pub(crate) fn encode_string_list(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

pub(crate) fn parse_string_list(
    column: &str,
    value: String,
) -> Result<Vec<String>, RepositoryError> {
    serde_json::from_str(&value).map_err(|error| {
        RepositoryError::Decode(format!("invalid json list in `{column}`: `{value}` ({error})"))
    })
}
