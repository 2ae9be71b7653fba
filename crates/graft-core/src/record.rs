//! # Source Records
//!
//! One row of a source table, already converted to typed values. Readers
//! (JSON lines, CSV, database cursors) live outside the core and hand over
//! `SourceRecord`s in order.

use crate::types::{GraftError, PropertyValue};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A source row: the table it came from plus its non-null fields.
///
/// Absent and null fields are indistinguishable; readers drop nulls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    kind: String,
    fields: BTreeMap<String, PropertyValue>,
}

impl SourceRecord {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field setter.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: PropertyValue) {
        self.fields.insert(name.into(), value);
    }

    /// Record kind, e.g. the source table name.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn require(&self, name: &str) -> Result<&PropertyValue, GraftError> {
        self.fields
            .get(name)
            .ok_or_else(|| GraftError::MissingField(name.to_string()))
    }

    /// A required identifier field rendered as text. Only text and integer
    /// values identify an entity.
    pub fn identifier(&self, name: &str) -> Result<String, GraftError> {
        match self.require(name)? {
            PropertyValue::Text(s) if !s.is_empty() => Ok(s.clone()),
            PropertyValue::Int(i) => Ok(i.to_string()),
            other => Err(GraftError::InvalidField {
                field: name.to_string(),
                reason: format!("{} is not a usable identifier", other.property_type()),
            }),
        }
    }

    /// A required text field.
    pub fn text(&self, name: &str) -> Result<String, GraftError> {
        match self.require(name)? {
            PropertyValue::Text(s) => Ok(s.clone()),
            other => Err(invalid(name, "text", other)),
        }
    }

    /// A required integer field. Integral text is accepted.
    pub fn int(&self, name: &str) -> Result<i64, GraftError> {
        match self.require(name)? {
            PropertyValue::Int(i) => Ok(*i),
            PropertyValue::Text(s) => s.trim().parse().map_err(|_| GraftError::InvalidField {
                field: name.to_string(),
                reason: format!("'{s}' is not an integer"),
            }),
            other => Err(invalid(name, "int", other)),
        }
    }

    /// A required timestamp field. Text is parsed leniently.
    pub fn timestamp(&self, name: &str) -> Result<DateTime<Utc>, GraftError> {
        match self.require(name)? {
            PropertyValue::Timestamp(ts) => Ok(*ts),
            PropertyValue::Text(s) => parse_timestamp(s).ok_or_else(|| GraftError::InvalidField {
                field: name.to_string(),
                reason: format!("'{s}' is not a recognised timestamp"),
            }),
            other => Err(invalid(name, "timestamp", other)),
        }
    }

    /// Optional timestamp: absent is `None`, present but malformed is an error.
    pub fn timestamp_opt(&self, name: &str) -> Result<Option<DateTime<Utc>>, GraftError> {
        if self.fields.contains_key(name) {
            self.timestamp(name).map(Some)
        } else {
            Ok(None)
        }
    }
}

fn invalid(field: &str, expected: &str, found: &PropertyValue) -> GraftError {
    GraftError::InvalidField {
        field: field.to_string(),
        reason: format!("expected {expected}, got {}", found.property_type()),
    }
}

/// Parse the timestamp shapes found in relational exports.
///
/// Tried in order: RFC 3339, ISO 8601 without zone (with and without
/// fractional seconds, `T` or space separated), date only. Zoneless values
/// are taken as UTC.
#[must_use]
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&ndt));
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|nd| nd.and_hms_opt(0, 0, 0))
        .map(|ndt| Utc.from_utc_datetime(&ndt))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_accepts_text_and_int() {
        let record = SourceRecord::new("question")
            .with("Id", "Q1")
            .with("OwnerUserId", 42_i64);
        assert_eq!(record.identifier("Id").expect("id"), "Q1");
        assert_eq!(record.identifier("OwnerUserId").expect("id"), "42");
    }

    #[test]
    fn identifier_rejects_other_shapes() {
        let record = SourceRecord::new("question")
            .with("Id", "")
            .with("Score", 1.5);
        assert!(matches!(
            record.identifier("Id"),
            Err(GraftError::InvalidField { .. })
        ));
        assert!(record.identifier("Score").is_err());
        assert!(matches!(
            record.identifier("ParentId"),
            Err(GraftError::MissingField(f)) if f == "ParentId"
        ));
    }

    #[test]
    fn int_parses_text() {
        let record = SourceRecord::new("question").with("Score", "17");
        assert_eq!(record.int("Score").expect("score"), 17);
        let bad = SourceRecord::new("question").with("Score", "lots");
        assert!(bad.int("Score").is_err());
    }

    #[test]
    fn timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2008, 8, 1, 13, 57, 7).single().expect("ts");
        for input in [
            "2008-08-01T13:57:07Z",
            "2008-08-01T13:57:07",
            "2008-08-01 13:57:07",
            "2008-08-01T13:57:07.000",
        ] {
            assert_eq!(parse_timestamp(input), Some(expected), "{input}");
        }
        assert_eq!(
            parse_timestamp("2008-08-01"),
            Utc.with_ymd_and_hms(2008, 8, 1, 0, 0, 0).single()
        );
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn optional_timestamp() {
        let record = SourceRecord::new("question").with("ClosedDate", "not a date");
        assert!(record.timestamp_opt("ClosedDate").is_err());
        assert_eq!(record.timestamp_opt("CloseDate").expect("absent"), None);
    }
}
