//! # Staging Tables
//!
//! Schema-validated, in-memory tables keyed by `TrackingKey`.
//!
//! A `StagingTable` buffers candidate property sets for one element kind until
//! they are sent to the engine. The identity tracker reuses the same table
//! type for its two tracking tables; the only difference is lifetime (staged
//! rows are flushed per batch, tracked rows live for the whole run).

use crate::key::TrackingKey;
use crate::primitives::{
    INGEST_TAG_NAMES, SOURCE_ANALYSIS_TAG, SOURCE_ANALYSIS_URL, SOURCE_DATA_TAG, SOURCE_DATA_URL,
};
use crate::schema::{ElementSchema, GraphModel};
use crate::types::{GraftError, PropertyMap, PropertyType, PropertyValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// INGEST TAGS
// =============================================================================

/// Provenance properties attached to every created or updated element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestTags {
    /// Identifier of the origin dataset.
    pub source_data_tag: String,
    /// Where the origin dataset can be found.
    pub source_data_url: String,
    /// Identifier of the analysis that produced this load.
    pub source_analysis_tag: String,
    /// Where that analysis is described.
    pub source_analysis_url: String,
}

impl IngestTags {
    pub fn new(
        source_data_tag: impl Into<String>,
        source_data_url: impl Into<String>,
        source_analysis_tag: impl Into<String>,
        source_analysis_url: impl Into<String>,
    ) -> Self {
        Self {
            source_data_tag: source_data_tag.into(),
            source_data_url: source_data_url.into(),
            source_analysis_tag: source_analysis_tag.into(),
            source_analysis_url: source_analysis_url.into(),
        }
    }

    /// Schema columns contributed by the tag set.
    pub fn columns() -> impl Iterator<Item = (&'static str, PropertyType)> {
        INGEST_TAG_NAMES.into_iter().map(|name| (name, PropertyType::Text))
    }

    /// Write the full tag set into `properties`, replacing earlier values.
    pub fn tag(&self, properties: &mut PropertyMap) {
        for (name, value) in [
            (SOURCE_DATA_TAG, &self.source_data_tag),
            (SOURCE_DATA_URL, &self.source_data_url),
            (SOURCE_ANALYSIS_TAG, &self.source_analysis_tag),
            (SOURCE_ANALYSIS_URL, &self.source_analysis_url),
        ] {
            properties.insert(name.to_string(), PropertyValue::Text(value.clone()));
        }
    }
}

// =============================================================================
// STAGING TABLE
// =============================================================================

/// One schema-validated table of property sets, keyed by tracking key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagingTable {
    schema: ElementSchema,
    rows: BTreeMap<TrackingKey, PropertyMap>,
}

impl StagingTable {
    /// Create an empty table for `schema`.
    #[must_use]
    pub fn new(schema: ElementSchema) -> Self {
        Self {
            schema,
            rows: BTreeMap::new(),
        }
    }

    /// Create an empty table whose schema also admits the ingest tag columns.
    pub fn with_tags(schema: &ElementSchema, tags: Option<&IngestTags>) -> Result<Self, GraftError> {
        let schema = match tags {
            Some(_) => schema.extended(IngestTags::columns())?,
            None => schema.clone(),
        };
        Ok(Self::new(schema))
    }

    #[must_use]
    pub fn schema(&self) -> &ElementSchema {
        &self.schema
    }

    /// Validate (subset mode) unless `check_schema` is false, then insert or
    /// replace the row for `key`.
    ///
    /// Restaging a key overwrites its row; it never adds a second one.
    pub fn stage(
        &mut self,
        key: TrackingKey,
        properties: PropertyMap,
        check_schema: bool,
    ) -> Result<(), GraftError> {
        if check_schema {
            self.schema.validate_properties(&properties, false)?;
        }
        self.rows.insert(key, properties);
        Ok(())
    }

    #[must_use]
    pub fn exists(&self, key: &TrackingKey) -> bool {
        self.rows.contains_key(key)
    }

    /// Look up a row. A miss is a normal negative result.
    #[must_use]
    pub fn get(&self, key: &TrackingKey) -> Option<&PropertyMap> {
        self.rows.get(key)
    }

    /// Look up a row that must exist.
    pub fn require(&self, key: &TrackingKey) -> Result<&PropertyMap, GraftError> {
        self.rows
            .get(key)
            .ok_or_else(|| GraftError::NotFound(key.clone()))
    }

    /// Remove and return one row (single-write flush).
    pub fn take(&mut self, key: &TrackingKey) -> Option<PropertyMap> {
        self.rows.remove(key)
    }

    /// Remove and return every row in key order (batch flush).
    pub fn drain(&mut self) -> Vec<(TrackingKey, PropertyMap)> {
        std::mem::take(&mut self.rows).into_iter().collect()
    }

    /// Keep only the rows for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&TrackingKey, &PropertyMap) -> bool) {
        self.rows.retain(|key, props| keep(key, props));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &TrackingKey> {
        self.rows.keys()
    }

    pub fn rows(&self) -> impl Iterator<Item = (&TrackingKey, &PropertyMap)> {
        self.rows.iter()
    }

    /// Columnar view of one property across all rows, in key order.
    /// Rows that omit the property yield `None`.
    pub fn column<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = (&'a TrackingKey, Option<&'a PropertyValue>)> + 'a {
        self.rows.iter().map(move |(key, props)| (key, props.get(name)))
    }
}

// =============================================================================
// STAGING AREA
// =============================================================================

/// The staging tables of one batch: one per registered vertex label plus one
/// for the edge kind.
#[derive(Debug, Clone)]
pub struct StagingArea {
    vertices: BTreeMap<String, StagingTable>,
    edges: StagingTable,
}

impl StagingArea {
    /// Build empty tables for every schema in `model`, with the tag columns
    /// unioned in when a tag set is configured.
    pub fn new(model: &GraphModel, tags: Option<&IngestTags>) -> Result<Self, GraftError> {
        let mut vertices = BTreeMap::new();
        for schema in model.vertex_schemas() {
            vertices.insert(
                schema.kind().to_string(),
                StagingTable::with_tags(schema, tags)?,
            );
        }
        Ok(Self {
            vertices,
            edges: StagingTable::with_tags(model.edge_schema(), tags)?,
        })
    }

    /// Stage a vertex property set under `label`.
    pub fn stage_vertex(
        &mut self,
        label: &str,
        key: TrackingKey,
        properties: PropertyMap,
        check_schema: bool,
    ) -> Result<(), GraftError> {
        self.vertex_table_mut(label)?
            .stage(key, properties, check_schema)
    }

    pub fn vertex_table(&self, label: &str) -> Result<&StagingTable, GraftError> {
        self.vertices
            .get(label)
            .ok_or_else(|| GraftError::UnknownElementKind(label.to_string()))
    }

    pub fn vertex_table_mut(&mut self, label: &str) -> Result<&mut StagingTable, GraftError> {
        self.vertices
            .get_mut(label)
            .ok_or_else(|| GraftError::UnknownElementKind(label.to_string()))
    }

    #[must_use]
    pub fn edges(&self) -> &StagingTable {
        &self.edges
    }

    pub fn edges_mut(&mut self) -> &mut StagingTable {
        &mut self.edges
    }

    /// Number of vertex rows staged across all labels.
    #[must_use]
    pub fn staged_vertices(&self) -> usize {
        self.vertices.values().map(StagingTable::len).sum()
    }
}

// =============================================================================
// TESTS
// =============================================================================
