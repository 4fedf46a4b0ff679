//! Timestamp Normalization
//!
//! The file source carries ISO-8601 text and the store returns DATETIME text.
//! Both are normalized to a `NaiveDateTime` before any comparison. Fractional
//! seconds and zone suffixes are discarded: readings are wall-clock instants.

use crate::StorageError;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

/// Canonical outward form
pub const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
/// Form bound to store parameters
pub const STORE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Length of `YYYY-MM-DDTHH:MM:SS`
const BASE_LEN: usize = 19;

/// Parse ISO-8601 or store DATETIME text into the canonical instant.
///
/// A bare date (`2024-01-01`) is the start of that day.
pub fn parse(input: &str) -> Result<NaiveDateTime, StorageError> {
    let text = input.trim();

    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN));
    }

    let (head, tail) = if text.len() > BASE_LEN && text.is_char_boundary(BASE_LEN) {
        text.split_at(BASE_LEN)
    } else {
        (text, "")
    };

    if !tail.is_empty() && !tail.starts_with(|c: char| matches!(c, '.' | 'Z' | '+' | '-')) {
        return Err(StorageError::InvalidTimestamp(input.to_string()));
    }

    let normalized = head.replacen(' ', "T", 1);
    NaiveDateTime::parse_from_str(&normalized, ISO_FORMAT)
        .map_err(|_| StorageError::InvalidTimestamp(input.to_string()))
}

/// Render as `YYYY-MM-DDTHH:MM:SS`
pub fn to_iso(ts: &NaiveDateTime) -> String {
    ts.format(ISO_FORMAT).to_string()
}

/// Render as `YYYY-MM-DD HH:MM:SS` for binding against DATETIME columns
pub fn to_store_text(ts: &NaiveDateTime) -> String {
    ts.format(STORE_FORMAT).to_string()
}

/// Serde adapter accepting every form `parse` accepts and writing ISO-8601.
pub mod serde_iso {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::to_iso(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::parse(&text).map_err(serde::de::Error::custom)
    }
}
