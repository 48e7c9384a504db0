//! Work units and their content-addressed storage keys.
//!
//! A [`WorkUnit`] names one page of one source for one ingestion date. Its
//! [`StorageKey`] is derived purely from those three fields, so the same unit
//! always lands on the same object and re-delivered work is detectable by
//! key presence alone.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// One `(source, date, page)` fetch-and-store task.
///
/// Serialized on the queue as
/// `{"endpoint": "...", "ingestion_date": "YYYY-MM-DD", "page": n}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "WireWorkUnit", into = "WireWorkUnit")]
pub struct WorkUnit {
    source: String,
    date: NaiveDate,
    page: u32,
}

/// Queue body layout. Field names are a wire contract shared with other
/// producers, which is why `source` travels as `endpoint`.
#[derive(Serialize, Deserialize)]
struct WireWorkUnit {
    endpoint: String,
    ingestion_date: NaiveDate,
    page: u32,
}

impl TryFrom<WireWorkUnit> for WorkUnit {
    type Error = CoreError;

    fn try_from(wire: WireWorkUnit) -> Result<Self, Self::Error> {
        WorkUnit::new(wire.endpoint, wire.ingestion_date, wire.page)
    }
}

impl From<WorkUnit> for WireWorkUnit {
    fn from(unit: WorkUnit) -> Self {
        Self {
            endpoint: unit.source,
            ingestion_date: unit.date,
            page: unit.page,
        }
    }
}

impl WorkUnit {
    /// Build a work unit. Source names are limited to ASCII letters, digits,
    /// `-`, `_` and `.` so the storage key is usable verbatim as an object path.
    pub fn new(source: impl Into<String>, date: NaiveDate, page: u32) -> Result<Self, CoreError> {
        let source = source.into();
        validate_source(&source)?;
        Ok(Self { source, date, page })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    /// Ingestion date in `YYYY-MM-DD` form.
    pub fn date_string(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/page-{}", self.source, self.date_string(), self.page)
    }
}

fn validate_source(source: &str) -> Result<(), CoreError> {
    if source.is_empty() {
        return Err(CoreError::InvalidWorkUnit("source must not be empty".into()));
    }
    if let Some(bad) = source
        .chars()
        .find(|&c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(CoreError::InvalidWorkUnit(format!(
            "source '{source}' contains unsupported character {bad:?}"
        )));
    }
    Ok(())
}

/// Deterministic object key for a work unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StorageKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Map a work unit to its storage key:
/// `raw/source={source}/ingestion_date={date}/page={page:06}.json.gz`.
///
/// The format must stay byte-for-byte stable; other readers partition on it.
pub fn key_for(unit: &WorkUnit) -> StorageKey {
    StorageKey(format!(
        "raw/source={}/ingestion_date={}/page={:06}.json.gz",
        unit.source,
        unit.date_string(),
        unit.page
    ))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn key_matches_wire_format() {
        let unit = WorkUnit::new("api-a", date("2024-01-01"), 1).unwrap();
        assert_eq!(
            key_for(&unit).as_str(),
            "raw/source=api-a/ingestion_date=2024-01-01/page=000001.json.gz"
        );
    }

    #[test]
    fn key_is_deterministic() {
        let a = WorkUnit::new("api-b", date("2025-06-14"), 42).unwrap();
        let b = WorkUnit::new("api-b", date("2025-06-14"), 42).unwrap();
        assert_eq!(key_for(&a), key_for(&b));
        assert_eq!(key_for(&a), key_for(&a.clone()));
    }

    #[test]
    fn keys_are_distinct_across_fields() {
        let mut seen = HashSet::new();
        for source in ["api-a", "api-b", "api-a-1"] {
            for day in ["2024-01-01", "2024-01-02", "2024-11-01"] {
                for page in [0, 1, 10, 11, 100, 999_999, 1_000_000] {
                    let unit = WorkUnit::new(source, date(day), page).unwrap();
                    assert!(seen.insert(key_for(&unit)), "duplicate key for {unit}");
                }
            }
        }
        assert_eq!(seen.len(), 3 * 3 * 7);
    }

    #[test]
    fn page_padding_widens_past_six_digits() {
        let unit = WorkUnit::new("api-c", date("2024-01-01"), 1_234_567).unwrap();
        assert!(key_for(&unit).as_str().ends_with("page=1234567.json.gz"));
    }

    #[test]
    fn rejects_ambiguous_sources() {
        assert!(WorkUnit::new("", date("2024-01-01"), 1).is_err());
        assert!(WorkUnit::new("a/b", date("2024-01-01"), 1).is_err());
    }

    #[test]
    fn rejects_sources_that_need_escaping_in_object_paths() {
        for source in ["api~a", "api#a", "api%7Ea", "api a", "api*", "api?", "ap[i]", "api{a}", "api|a", "api\\a", "apí"] {
            let err = WorkUnit::new(source, date("2024-01-01"), 1).unwrap_err();
            assert!(matches!(err, CoreError::InvalidWorkUnit(_)), "{source}");
        }
        for source in ["api-a", "api_b", "v2.orders", "API9"] {
            assert!(WorkUnit::new(source, date("2024-01-01"), 1).is_ok(), "{source}");
        }
    }

    #[test]
    fn wire_body_with_unsupported_source_is_rejected() {
        let body = r#"{"endpoint":"api~a","ingestion_date":"2024-01-01","page":1}"#;
        assert!(serde_json::from_str::<WorkUnit>(body).is_err());
    }

    #[test]
    fn wire_format_uses_endpoint_field_names() {
        let unit = WorkUnit::new("api-d", date("2024-03-05"), 7).unwrap();
        let json = serde_json::to_value(&unit).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"endpoint": "api-d", "ingestion_date": "2024-03-05", "page": 7})
        );

        let back: WorkUnit = serde_json::from_value(json).unwrap();
        assert_eq!(back, unit);
    }

    #[test]
    fn wire_format_rejects_bad_values() {
        let negative = r#"{"endpoint":"api-a","ingestion_date":"2024-01-01","page":-1}"#;
        assert!(serde_json::from_str::<WorkUnit>(negative).is_err());

        let bad_date = r#"{"endpoint":"api-a","ingestion_date":"01/02/2024","page":1}"#;
        assert!(serde_json::from_str::<WorkUnit>(bad_date).is_err());

        let slash = r#"{"endpoint":"a/b","ingestion_date":"2024-01-01","page":1}"#;
        assert!(serde_json::from_str::<WorkUnit>(slash).is_err());
    }
}
