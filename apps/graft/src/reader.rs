//! # JSON Lines Reader
//!
//! Turns a JSON-lines export (one object per line) into a feed of
//! `SourceRecord`s of a fixed kind.
//!
//! Field mapping:
//! - `null` drops the field
//! - integers become `Int`, other numbers `Float`
//! - strings and booleans map directly
//! - arrays and objects are kept as their JSON text

use graft_core::{GraftError, PropertyValue, SourceRecord};
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::str::FromStr;

// =============================================================================
// INPUT SPEC
// =============================================================================

/// One `KIND:PATH` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSpec {
    pub kind: String,
    pub path: PathBuf,
}

impl FromStr for InputSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, path) = s
            .split_once(':')
            .ok_or_else(|| format!("expected KIND:PATH, got '{s}'"))?;
        if kind.is_empty() || path.is_empty() {
            return Err(format!("expected KIND:PATH, got '{s}'"));
        }
        Ok(Self {
            kind: kind.to_string(),
            path: PathBuf::from(path),
        })
    }
}

// =============================================================================
// READER
// =============================================================================

/// Lazily parsed record feed over a line-oriented source.
pub struct JsonLinesReader<R> {
    kind: String,
    origin: String,
    lines: std::io::Lines<R>,
    line_no: usize,
}

impl JsonLinesReader<BufReader<File>> {
    /// Open `path` as a feed of `kind` records.
    pub fn open(path: &Path, kind: &str) -> Result<Self, GraftError> {
        let file = File::open(path).map_err(|e| {
            GraftError::IoError(format!("Cannot open '{}': {}", path.display(), e))
        })?;
        Ok(Self::new(BufReader::new(file), kind, path.display().to_string()))
    }
}

impl<R: BufRead> JsonLinesReader<R> {
    /// `origin` names the source in error messages.
    pub fn new(reader: R, kind: &str, origin: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            origin: origin.into(),
            lines: reader.lines(),
            line_no: 0,
        }
    }
}

impl<R: BufRead> Iterator for JsonLinesReader<R> {
    type Item = Result<SourceRecord, GraftError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = self.lines.next()?;
            self.line_no += 1;

            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    return Some(Err(GraftError::IoError(format!(
                        "{}:{}: {}",
                        self.origin, self.line_no, e
                    ))));
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let parsed = serde_json::from_str::<Value>(&line)
                .map_err(|e| GraftError::SerializationError(e.to_string()))
                .and_then(|value| record_from_json(&self.kind, &value));
            return Some(parsed.map_err(|e| match e {
                GraftError::SerializationError(msg) => GraftError::SerializationError(format!(
                    "{}:{}: {}",
                    self.origin, self.line_no, msg
                )),
                other => other,
            }));
        }
    }
}

/// Build a record of `kind` from one JSON object.
pub fn record_from_json(kind: &str, value: &Value) -> Result<SourceRecord, GraftError> {
    let object = value.as_object().ok_or_else(|| {
        GraftError::SerializationError(format!("expected a JSON object, got {}", type_name(value)))
    })?;

    let mut record = SourceRecord::new(kind);
    for (name, field) in object {
        if let Some(value) = property_value(field) {
            record.insert(name.clone(), value);
        }
    }
    Ok(record)
}

fn property_value(value: &Value) -> Option<PropertyValue> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(PropertyValue::Bool(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(PropertyValue::Int(i)),
            None => n.as_f64().map(PropertyValue::Float),
        },
        Value::String(s) => Some(PropertyValue::Text(s.clone())),
        Value::Array(_) | Value::Object(_) => Some(PropertyValue::Text(value.to_string())),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// =============================================================================
// TESTS
// =============================================================================
