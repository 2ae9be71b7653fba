//! # Tracking Keys
//!
//! Deterministic keys derived from source identifiers. The identity tracker
//! and the staging tables are keyed by these, never by engine identifiers.
//!
//! ## Format
//!
//! ```text
//! vertex:  <prefix>-<escaped source id>              user-U1
//! edge:    <prefix>-<vertex key>-<vertex key>        uq-user-U1-question-Q1
//! ```
//!
//! Prefixes are restricted to `[A-Za-z0-9_]`. Inside source identifiers the
//! separator is written as `\-` and the escape character as `\\`, so a vertex
//! key contains exactly one unescaped separator and an edge key exactly four.
//! Two keys are equal only if they were derived from equal parts.

use crate::types::GraftError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between key segments.
pub const KEY_SEPARATOR: char = '-';

/// Escape character used inside source identifiers.
const ESCAPE: char = '\\';

/// A stable key identifying one source entity or relationship.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TrackingKey(String);

/// The parts a tracking key was derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyParts {
    Vertex {
        prefix: String,
        source_id: String,
    },
    Edge {
        prefix: String,
        from: TrackingKey,
        to: TrackingKey,
    },
}

impl TrackingKey {
    /// Derive the key of a vertex-like entity from its kind prefix and source id.
    ///
    /// ```
    /// use graft_core::TrackingKey;
    ///
    /// let key = TrackingKey::vertex("user", "U1").expect("key");
    /// assert_eq!(key.as_str(), "user-U1");
    /// ```
    pub fn vertex(prefix: &str, source_id: &str) -> Result<Self, GraftError> {
        check_prefix(prefix)?;
        if source_id.is_empty() {
            return Err(GraftError::InvalidKey(format!(
                "empty source identifier for prefix '{prefix}'"
            )));
        }

        let mut key = String::with_capacity(prefix.len() + source_id.len() + 1);
        key.push_str(prefix);
        key.push(KEY_SEPARATOR);
        for c in source_id.chars() {
            if c == KEY_SEPARATOR || c == ESCAPE {
                key.push(ESCAPE);
            }
            key.push(c);
        }
        Ok(Self(key))
    }

    /// Derive the key of a relationship between two tracked vertices.
    ///
    /// Both endpoints must be vertex keys; nesting edge keys would make the
    /// format ambiguous.
    pub fn edge(prefix: &str, from: &Self, to: &Self) -> Result<Self, GraftError> {
        check_prefix(prefix)?;
        for endpoint in [from, to] {
            if unescaped_separators(&endpoint.0) != 1 {
                return Err(GraftError::InvalidKey(format!(
                    "edge endpoint '{endpoint}' is not a vertex key"
                )));
            }
        }
        Ok(Self(format!(
            "{prefix}{KEY_SEPARATOR}{}{KEY_SEPARATOR}{}",
            from.0, to.0
        )))
    }

    /// Get the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decompose the key back into the parts it was derived from.
    pub fn parts(&self) -> Result<KeyParts, GraftError> {
        let segments = split_unescaped(&self.0);
        match segments.as_slice() {
            [prefix, id] => Ok(KeyParts::Vertex {
                prefix: (*prefix).to_string(),
                source_id: unescape(id),
            }),
            [prefix, from_prefix, from_id, to_prefix, to_id] => Ok(KeyParts::Edge {
                prefix: (*prefix).to_string(),
                from: Self(format!("{from_prefix}{KEY_SEPARATOR}{from_id}")),
                to: Self(format!("{to_prefix}{KEY_SEPARATOR}{to_id}")),
            }),
            _ => Err(GraftError::InvalidKey(format!(
                "'{}' has {} segments",
                self.0,
                segments.len()
            ))),
        }
    }

    /// The kind prefix of the key.
    #[must_use]
    pub fn prefix(&self) -> &str {
        self.0
            .split(KEY_SEPARATOR)
            .next()
            .unwrap_or(self.0.as_str())
    }
}

impl fmt::Display for TrackingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<TrackingKey> for String {
    fn from(key: TrackingKey) -> Self {
        key.0
    }
}

impl TryFrom<String> for TrackingKey {
    type Error = GraftError;

    /// Accept a persisted key only if deriving it again from its parts gives
    /// the same text. Stray escapes (`user-a\`, `user-\a`) would otherwise
    /// decode to the parts of another key.
    fn try_from(raw: String) -> Result<Self, Self::Error> {
        let key = Self(raw);
        let derived = match key.parts()? {
            KeyParts::Vertex { prefix, source_id } => Self::vertex(&prefix, &source_id)?,
            KeyParts::Edge { prefix, from, to } => {
                let from = Self::try_from(from.0)?;
                let to = Self::try_from(to.0)?;
                Self::edge(&prefix, &from, &to)?
            }
        };
        if derived != key {
            return Err(GraftError::InvalidKey(format!(
                "'{key}' is not in canonical form"
            )));
        }
        Ok(key)
    }
}

fn check_prefix(prefix: &str) -> Result<(), GraftError> {
    if prefix.is_empty() {
        return Err(GraftError::InvalidKey("empty key prefix".to_string()));
    }
    if !prefix
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(GraftError::InvalidKey(format!(
            "key prefix '{prefix}' may only contain [A-Za-z0-9_]"
        )));
    }
    Ok(())
}

fn unescaped_separators(raw: &str) -> usize {
    split_unescaped(raw).len().saturating_sub(1)
}

/// Split on separators that are not preceded by an escape. Segments keep
/// their escapes.
fn split_unescaped(raw: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in raw.char_indices() {
        if escaped {
            escaped = false;
        } else if c == ESCAPE {
            escaped = true;
        } else if c == KEY_SEPARATOR {
            segments.push(&raw[start..i]);
            start = i + c.len_utf8();
        }
    }
    segments.push(&raw[start..]);
    segments
}

fn unescape(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut escaped = false;
    for c in segment.chars() {
        if !escaped && c == ESCAPE {
            escaped = true;
            continue;
        }
        escaped = false;
        out.push(c);
    }
    out
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn key(prefix: &str, id: &str) -> TrackingKey {
        TrackingKey::vertex(prefix, id).expect("vertex key")
    }

    #[test]
    fn plain_vertex_and_edge_keys() {
        let user = key("user", "U1");
        let question = key("question", "Q1");
        let edge = TrackingKey::edge("uq", &user, &question).expect("edge key");

        assert_eq!(user.as_str(), "user-U1");
        assert_eq!(question.as_str(), "question-Q1");
        assert_eq!(edge.as_str(), "uq-user-U1-question-Q1");
    }

    #[test]
    fn separator_in_identifier_does_not_collide() {
        // Naive concatenation maps both of these to "a-b-c".
        let left = key("a", "b-c");
        let right = TrackingKey::vertex("a-b", "c");

        assert_eq!(left.as_str(), r"a-b\-c");
        assert!(right.is_err());
    }

    #[test]
    fn edge_keys_with_separators_stay_distinct() {
        let e1 = TrackingKey::edge("uq", &key("user", "1-question"), &key("x", "2"))
            .expect("edge");
        let e2 = TrackingKey::edge("uq", &key("user", "1"), &key("question", "x-2"))
            .expect("edge");
        assert_ne!(e1, e2);
    }

    #[test]
    fn escape_character_is_escaped() {
        let k = key("user", r"a\-b");
        assert_eq!(k.as_str(), r"user-a\\\-b");
        assert_eq!(
            k.parts().expect("parts"),
            KeyParts::Vertex {
                prefix: "user".to_string(),
                source_id: r"a\-b".to_string()
            }
        );
    }

    #[test]
    fn edge_parts_roundtrip() {
        let from = key("answer", "A-7");
        let to = key("question", "Q-9");
        let edge = TrackingKey::edge("aq", &from, &to).expect("edge");

        assert_eq!(
            edge.parts().expect("parts"),
            KeyParts::Edge {
                prefix: "aq".to_string(),
                from,
                to
            }
        );
        assert_eq!(edge.prefix(), "aq");
    }

    #[test]
    fn edge_of_edges_rejected() {
        let a = key("user", "1");
        let b = key("question", "2");
        let edge = TrackingKey::edge("uq", &a, &b).expect("edge");
        assert!(matches!(
            TrackingKey::edge("meta", &edge, &a),
            Err(GraftError::InvalidKey(_))
        ));
    }

    #[test]
    fn invalid_prefixes_and_ids_rejected() {
        assert!(TrackingKey::vertex("", "1").is_err());
        assert!(TrackingKey::vertex("us er", "1").is_err());
        assert!(TrackingKey::vertex("user", "").is_err());
    }

    #[test]
    fn persisted_form_is_validated() {
        assert!(TrackingKey::try_from("user-U1".to_string()).is_ok());
        assert!(TrackingKey::try_from("uq-user-U1-question-Q1".to_string()).is_ok());
        assert!(TrackingKey::try_from("a-b-c".to_string()).is_err());
        assert!(TrackingKey::try_from("-x".to_string()).is_err());
    }

    #[test]
    fn persisted_key_with_stray_escape_rejected() {
        let plain = key("user", "a");
        assert_eq!(
            plain.parts().expect("parts"),
            TrackingKey(r"user-a\".to_string()).parts().expect("parts")
        );

        assert!(TrackingKey::try_from(r"user-a\".to_string()).is_err());
        assert!(TrackingKey::try_from(r"user-\a".to_string()).is_err());
        assert!(TrackingKey::try_from(r"uq-user-a\-question-Q1".to_string()).is_err());
        assert!(TrackingKey::try_from(r"user-a\\".to_string()).is_ok());
        assert!(TrackingKey::try_from(r"user-a\-b".to_string()).is_ok());
    }
}
