//! # Core Type Definitions
//!
//! This module contains the value and error types shared by every layer:
//! - Property typing (`PropertyType`, `PropertyValue`, `PropertyMap`)
//! - Identifiers handed out by the remote engine (`EngineId`)
//! - Error types (`SchemaError`, `RemoteError`, `GraftError`)
//!
//! ## Determinism Guarantees
//!
//! Property maps are `BTreeMap`s, so iteration order (and therefore the order
//! in which properties are sent to the engine) is stable across runs.

use crate::key::TrackingKey;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

// =============================================================================
// PROPERTY TYPES
// =============================================================================

/// The primitive kinds an element property may take.
///
/// Used for declarative schema validation only; the staging tables do not
/// lay out storage by type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PropertyType {
    /// Free-form text (also used for lists and opaque objects).
    Text,
    /// 64-bit signed integer.
    Int,
    /// 64-bit float. Integers are accepted where a float is declared.
    Float,
    /// Boolean flag.
    Bool,
    /// UTC timestamp.
    Timestamp,
}

impl PropertyType {
    /// Stable lowercase name, used in error messages and config files.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// PROPERTY VALUES
// =============================================================================

/// A single typed property value.
///
/// This is the boundary type for everything that flows into a staging table,
/// the identity tracker or the remote engine. Loosely typed input (JSON rows,
/// CSV cells) is converted into this sum type before it reaches the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
}

impl PropertyValue {
    /// The declared type this value naturally has.
    #[must_use]
    pub const fn property_type(&self) -> PropertyType {
        match self {
            Self::Text(_) => PropertyType::Text,
            Self::Int(_) => PropertyType::Int,
            Self::Float(_) => PropertyType::Float,
            Self::Bool(_) => PropertyType::Bool,
            Self::Timestamp(_) => PropertyType::Timestamp,
        }
    }

    /// Check whether this value may be stored under a property of type `ty`.
    #[must_use]
    pub const fn conforms_to(&self, ty: PropertyType) -> bool {
        matches!(
            (self, ty),
            (Self::Text(_), PropertyType::Text)
                | (Self::Int(_), PropertyType::Int | PropertyType::Float)
                | (Self::Float(_), PropertyType::Float)
                | (Self::Bool(_), PropertyType::Bool)
                | (Self::Timestamp(_), PropertyType::Timestamp)
        )
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Timestamp(ts) => f.write_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for PropertyValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for PropertyValue {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<DateTime<Utc>> for PropertyValue {
    fn from(ts: DateTime<Utc>) -> Self {
        Self::Timestamp(ts)
    }
}

/// A property set for one element, ordered by property name.
pub type PropertyMap = BTreeMap<String, PropertyValue>;

// =============================================================================
// ENGINE IDENTIFIERS
// =============================================================================

/// Identifier assigned by the remote graph engine when an element is created.
///
/// Opaque to the core. Engines differ: JanusGraph hands out longs, Neptune and
/// Cosmos hand out strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EngineId {
    Long(i64),
    Text(String),
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long(id) => write!(f, "{id}"),
            Self::Text(id) => f.write_str(id),
        }
    }
}

impl From<EngineId> for PropertyValue {
    fn from(id: EngineId) -> Self {
        match id {
            EngineId::Long(id) => Self::Int(id),
            EngineId::Text(id) => Self::Text(id),
        }
    }
}

impl TryFrom<&PropertyValue> for EngineId {
    type Error = GraftError;

    fn try_from(value: &PropertyValue) -> Result<Self, Self::Error> {
        match value {
            PropertyValue::Int(id) => Ok(Self::Long(*id)),
            PropertyValue::Text(id) => Ok(Self::Text(id.clone())),
            other => Err(GraftError::SerializationError(format!(
                "{} value cannot hold an engine identifier",
                other.property_type()
            ))),
        }
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Schema validation failures. Local only; never touches the network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// A supplied property is not declared for the element kind.
    #[error("property '{name}' is not declared in the '{kind}' schema")]
    UnknownProperty { kind: String, name: String },

    /// A declared property is absent and the check required an exact match.
    #[error("property '{name}' is declared in the '{kind}' schema but was not supplied")]
    MissingProperty { kind: String, name: String },

    /// A value does not conform to the declared property type.
    #[error("property '{name}' of '{kind}' expects {expected}, got {found}")]
    TypeMismatch {
        kind: String,
        name: String,
        expected: PropertyType,
        found: PropertyType,
    },

    /// The same property name was declared twice in one schema.
    #[error("property '{name}' is declared twice in the '{kind}' schema")]
    DuplicateProperty { kind: String, name: String },
}

/// Failures reported by the remote graph engine client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The engine could not be reached.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The request did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// The engine failed while executing the write (5xx class).
    #[error("engine error ({status}): {message}")]
    Engine { status: u16, message: String },

    /// The engine refused the write; retrying the same request will not help.
    #[error("write rejected: {0}")]
    Rejected(String),

    /// The engine answered with something the client cannot interpret.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl RemoteError {
    /// Whether resubmitting the same write may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Timeout | Self::Engine { .. }
        )
    }
}

/// Errors that can occur anywhere in graft-core.
///
/// - No silent failures
/// - Remote failures always carry the tracking key of the element being written
#[derive(Debug, Error)]
pub enum GraftError {
    /// A property set failed schema validation.
    #[error("schema violation: {0}")]
    Schema(#[from] SchemaError),

    /// Staging or tracking under a label with no registered schema.
    #[error("unknown element kind: {0}")]
    UnknownElementKind(String),

    /// A lookup that required a tracked element found nothing.
    #[error("no element tracked under '{0}'")]
    NotFound(TrackingKey),

    /// The remote engine failed to accept a write.
    #[error("remote write for '{key}' failed: {source}")]
    RemoteWrite {
        key: TrackingKey,
        #[source]
        source: RemoteError,
    },

    /// A tracking key could not be derived from the supplied parts.
    #[error("invalid tracking key: {0}")]
    InvalidKey(String),

    /// A source record lacks a field its record kind requires.
    #[error("record is missing required field '{0}'")]
    MissingField(String),

    /// A source record field holds a value of the wrong shape.
    #[error("record field '{field}' is invalid: {reason}")]
    InvalidField { field: String, reason: String },

    /// No mapping is registered for this record kind.
    #[error("unknown record kind: {0}")]
    UnknownRecordKind(String),

    /// A persisted tracker was written with different tracking schemas.
    #[error("incompatible tracker: {0}")]
    IncompatibleTracker(String),

    /// An I/O operation failed.
    #[error("I/O error: {0}")]
    IoError(String),

    /// Serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl GraftError {
    /// Whether the error came from the remote engine rather than local checks.
    #[must_use]
    pub const fn is_remote(&self) -> bool {
        matches!(self, Self::RemoteWrite { .. })
    }
}

// =============================================================================
// TESTS
// =============================================================================
