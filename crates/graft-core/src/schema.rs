//! # Element Schemas
//!
//! Declares the typed property set a vertex label or the edge kind may carry
//! and validates candidate property sets against it.
//!
//! Validation is pure: nothing here touches a staging table, the tracker or
//! the network.

use crate::types::{PropertyMap, PropertyType, SchemaError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// ELEMENT SCHEMA
// =============================================================================

/// Ordered mapping from property name to `PropertyType` for one element kind.
///
/// Property names are unique; declaration order is kept for display and for
/// the columnar views of staging tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SchemaRepr", into = "SchemaRepr")]
pub struct ElementSchema {
    kind: String,
    columns: Vec<(String, PropertyType)>,
    index: BTreeMap<String, usize>,
}

/// Serialized form: the kind plus columns in declaration order.
#[derive(Serialize, Deserialize)]
struct SchemaRepr {
    kind: String,
    columns: Vec<(String, PropertyType)>,
}

impl ElementSchema {
    /// Build a schema for `kind` from `(name, type)` pairs.
    ///
    /// Fails with `SchemaError::DuplicateProperty` if a name repeats.
    pub fn new<K, I, N>(kind: K, columns: I) -> Result<Self, SchemaError>
    where
        K: Into<String>,
        I: IntoIterator<Item = (N, PropertyType)>,
        N: Into<String>,
    {
        let mut schema = Self {
            kind: kind.into(),
            columns: Vec::new(),
            index: BTreeMap::new(),
        };
        for (name, ty) in columns {
            schema.declare(name.into(), ty)?;
        }
        Ok(schema)
    }

    /// Return a copy of this schema with extra columns appended.
    ///
    /// Names already declared with the same type are left alone, so the same
    /// tag set can be merged in more than once.
    pub fn extended<I, N>(&self, extra: I) -> Result<Self, SchemaError>
    where
        I: IntoIterator<Item = (N, PropertyType)>,
        N: Into<String>,
    {
        let mut schema = self.clone();
        for (name, ty) in extra {
            let name = name.into();
            match schema.get(&name) {
                Some(existing) if existing == ty => {}
                Some(_) => {
                    return Err(SchemaError::DuplicateProperty {
                        kind: schema.kind.clone(),
                        name,
                    });
                }
                None => schema.declare(name, ty)?,
            }
        }
        Ok(schema)
    }

    fn declare(&mut self, name: String, ty: PropertyType) -> Result<(), SchemaError> {
        if self.index.contains_key(&name) {
            return Err(SchemaError::DuplicateProperty {
                kind: self.kind.clone(),
                name,
            });
        }
        self.index.insert(name.clone(), self.columns.len());
        self.columns.push((name, ty));
        Ok(())
    }

    /// The element kind (vertex label or edge kind) this schema describes.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Declared type of a property, if declared.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<PropertyType> {
        self.index.get(name).map(|&i| self.columns[i].1)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Property names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    /// `(name, type)` pairs in declaration order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, PropertyType)> {
        self.columns.iter().map(|(name, ty)| (name.as_str(), *ty))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Validate a set of property names.
    ///
    /// - `require_exact = true`: the names must equal the declared set.
    /// - `require_exact = false`: the names must be a subset (partial and
    ///   placeholder elements).
    ///
    /// Unknown names are reported before missing ones.
    pub fn validate<'a, I>(&self, names: I, require_exact: bool) -> Result<(), SchemaError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut supplied = BTreeSet::new();
        for name in names {
            if !self.contains(name) {
                return Err(SchemaError::UnknownProperty {
                    kind: self.kind.clone(),
                    name: name.to_string(),
                });
            }
            supplied.insert(name);
        }

        if require_exact {
            if let Some(missing) = self.names().find(|name| !supplied.contains(name)) {
                return Err(SchemaError::MissingProperty {
                    kind: self.kind.clone(),
                    name: missing.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Validate a property map: names as in [`validate`](Self::validate),
    /// then every value against its declared type.
    pub fn validate_properties(
        &self,
        properties: &PropertyMap,
        require_exact: bool,
    ) -> Result<(), SchemaError> {
        self.validate(properties.keys().map(String::as_str), false)?;

        for (name, value) in properties {
            // Declared: checked above.
            let Some(expected) = self.get(name) else {
                continue;
            };
            if !value.conforms_to(expected) {
                return Err(SchemaError::TypeMismatch {
                    kind: self.kind.clone(),
                    name: name.clone(),
                    expected,
                    found: value.property_type(),
                });
            }
        }

        self.validate(properties.keys().map(String::as_str), require_exact)
    }
}

impl TryFrom<SchemaRepr> for ElementSchema {
    type Error = SchemaError;

    fn try_from(repr: SchemaRepr) -> Result<Self, Self::Error> {
        Self::new(repr.kind, repr.columns)
    }
}

impl From<ElementSchema> for SchemaRepr {
    fn from(schema: ElementSchema) -> Self {
        Self {
            kind: schema.kind,
            columns: schema.columns,
        }
    }
}

// =============================================================================
// GRAPH MODEL
// =============================================================================

/// All element schemas of one ingestion run: one per vertex label plus the
/// single edge kind. Defined once at configuration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphModel {
    vertices: BTreeMap<String, ElementSchema>,
    edge: ElementSchema,
}

impl GraphModel {
    /// Create a model with the given edge schema and no vertex labels.
    #[must_use]
    pub fn new(edge: ElementSchema) -> Self {
        Self {
            vertices: BTreeMap::new(),
            edge,
        }
    }

    /// Register a vertex label, keyed by the schema's kind.
    #[must_use]
    pub fn with_vertex(mut self, schema: ElementSchema) -> Self {
        self.vertices.insert(schema.kind().to_string(), schema);
        self
    }

    #[must_use]
    pub fn vertex_schema(&self, label: &str) -> Option<&ElementSchema> {
        self.vertices.get(label)
    }

    pub fn vertex_schemas(&self) -> impl Iterator<Item = &ElementSchema> {
        self.vertices.values()
    }

    #[must_use]
    pub fn edge_schema(&self) -> &ElementSchema {
        &self.edge
    }
}

// =============================================================================
// TESTS
// =============================================================================
