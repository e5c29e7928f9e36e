use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

/// Timestamps are stored as a JSON array of RFC 3339 strings.
pub fn timestamps_to_json(values: &[DateTime<Utc>]) -> Result<String> {
    serde_json::to_string(values).context("failed to encode timestamps")
}

pub fn timestamps_from_json(value: &str, field: &str) -> Result<Vec<DateTime<Utc>>> {
    serde_json::from_str(value).with_context(|| format!("failed to parse {field}"))
}
