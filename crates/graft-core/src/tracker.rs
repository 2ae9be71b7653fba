//! # Identity Tracker
//!
//! The dedup authority of an ingestion run. Maps tracking keys to the
//! identifiers the remote engine assigned when the element was created.
//!
//! This module defines the `TrackerStore` trait and the in-memory
//! `IdentityTracker`. The redb-backed implementation lives in `storage`.
//!
//! ## Invariants
//!
//! - A key is recorded only after the engine accepted the create.
//! - Recording an existing key overwrites its row; the engine identifier it
//!   carries never changes for the rest of the run.
//! - Rows are never deleted during a run.

use crate::key::TrackingKey;
use crate::primitives::{ELEMENT_LABEL, ENGINE_ID, FROM_ENGINE_ID, TO_ENGINE_ID};
use crate::schema::ElementSchema;
use crate::staging::StagingTable;
use crate::types::{EngineId, GraftError, PropertyMap, PropertyType, PropertyValue, SchemaError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// TRACKING SCHEMAS
// =============================================================================

/// Default vertex tracking schema: just the engine identifier.
pub fn vertex_tracking_schema() -> Result<ElementSchema, SchemaError> {
    ElementSchema::new("VertexTracking", [(ENGINE_ID, PropertyType::Text)])
}

/// Default edge tracking schema: both endpoint identifiers and the label.
pub fn edge_tracking_schema() -> Result<ElementSchema, SchemaError> {
    ElementSchema::new(
        "EdgeTracking",
        [
            (FROM_ENGINE_ID, PropertyType::Text),
            (TO_ENGINE_ID, PropertyType::Text),
            (ELEMENT_LABEL, PropertyType::Text),
        ],
    )
}

/// Typed view of a vertex tracking row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedVertex {
    pub engine_id: EngineId,
}

impl TrackedVertex {
    /// Build the tracking row for a freshly created vertex.
    #[must_use]
    pub fn properties(engine_id: &EngineId) -> PropertyMap {
        PropertyMap::from([(ENGINE_ID.to_string(), PropertyValue::from(engine_id.clone()))])
    }

    fn from_row(key: &TrackingKey, row: &PropertyMap) -> Result<Self, GraftError> {
        Ok(Self {
            engine_id: engine_id_column(key, row, ENGINE_ID)?,
        })
    }
}

/// Typed view of an edge tracking row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedEdge {
    pub from: EngineId,
    pub to: EngineId,
    pub label: String,
}

impl TrackedEdge {
    /// Build the tracking row for a freshly created edge.
    #[must_use]
    pub fn properties(from: &EngineId, to: &EngineId, label: &str) -> PropertyMap {
        PropertyMap::from([
            (FROM_ENGINE_ID.to_string(), PropertyValue::from(from.clone())),
            (TO_ENGINE_ID.to_string(), PropertyValue::from(to.clone())),
            (ELEMENT_LABEL.to_string(), PropertyValue::from(label)),
        ])
    }

    fn from_row(key: &TrackingKey, row: &PropertyMap) -> Result<Self, GraftError> {
        let label = row
            .get(ELEMENT_LABEL)
            .and_then(PropertyValue::as_text)
            .ok_or_else(|| {
                GraftError::SerializationError(format!("edge row '{key}' has no label"))
            })?;
        Ok(Self {
            from: engine_id_column(key, row, FROM_ENGINE_ID)?,
            to: engine_id_column(key, row, TO_ENGINE_ID)?,
            label: label.to_string(),
        })
    }
}

/// A staged edge still waiting for an endpoint, kept across runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEdgeRow {
    pub from: TrackingKey,
    pub to: TrackingKey,
    pub label: String,
    /// Decorated property set, sent as-is once both endpoints are tracked.
    pub properties: PropertyMap,
}

fn engine_id_column(
    key: &TrackingKey,
    row: &PropertyMap,
    column: &str,
) -> Result<EngineId, GraftError> {
    let value = row.get(column).ok_or_else(|| {
        GraftError::SerializationError(format!("tracking row '{key}' has no {column}"))
    })?;
    EngineId::try_from(value)
}

// =============================================================================
// TRACKERSTORE TRAIT
// =============================================================================

/// The TrackerStore trait defines the identity tracker operations.
///
/// Fallible operations return `Result<T, GraftError>` so that in-memory and
/// persistent backends are used the same way.
pub trait TrackerStore {
    /// Schema every vertex tracking row is validated against.
    fn vertex_schema(&self) -> &ElementSchema;

    /// Schema every edge tracking row is validated against.
    fn edge_schema(&self) -> &ElementSchema;

    fn vertex_exists(&self, key: &TrackingKey) -> Result<bool, GraftError>;

    /// Tracking row of a vertex. `None` is a normal negative result.
    fn get_vertex(&self, key: &TrackingKey) -> Result<Option<PropertyMap>, GraftError>;

    /// Create or overwrite the tracking row of a vertex.
    fn record_vertex(
        &mut self,
        key: &TrackingKey,
        properties: PropertyMap,
        check_schema: bool,
    ) -> Result<(), GraftError>;

    fn edge_exists(&self, key: &TrackingKey) -> Result<bool, GraftError>;

    /// Tracking row of an edge. `None` is a normal negative result.
    fn get_edge(&self, key: &TrackingKey) -> Result<Option<PropertyMap>, GraftError>;

    /// Create or overwrite the tracking row of an edge.
    fn record_edge(
        &mut self,
        key: &TrackingKey,
        properties: PropertyMap,
        check_schema: bool,
    ) -> Result<(), GraftError>;

    fn vertex_count(&self) -> Result<usize, GraftError>;

    fn edge_count(&self) -> Result<usize, GraftError>;

    /// Edges a previous run staged but never created, in key order.
    fn pending_edges(&self) -> Result<Vec<(TrackingKey, PendingEdgeRow)>, GraftError>;

    /// Replace the stored pending edges with `edges`.
    fn store_pending_edges(
        &mut self,
        edges: Vec<(TrackingKey, PendingEdgeRow)>,
    ) -> Result<(), GraftError>;

    /// Engine identifier of a tracked vertex.
    fn vertex_engine_id(&self, key: &TrackingKey) -> Result<Option<EngineId>, GraftError> {
        self.get_vertex(key)?
            .map(|row| TrackedVertex::from_row(key, &row).map(|v| v.engine_id))
            .transpose()
    }

    /// Typed edge row.
    fn tracked_edge(&self, key: &TrackingKey) -> Result<Option<TrackedEdge>, GraftError> {
        self.get_edge(key)?
            .map(|row| TrackedEdge::from_row(key, &row))
            .transpose()
    }

    /// Tracking row of a vertex that must exist.
    fn require_vertex(&self, key: &TrackingKey) -> Result<PropertyMap, GraftError> {
        self.get_vertex(key)?
            .ok_or_else(|| GraftError::NotFound(key.clone()))
    }

    /// Tracking row of an edge that must exist.
    fn require_edge(&self, key: &TrackingKey) -> Result<PropertyMap, GraftError> {
        self.get_edge(key)?
            .ok_or_else(|| GraftError::NotFound(key.clone()))
    }
}

// =============================================================================
// IN-MEMORY TRACKER
// =============================================================================

/// In-memory identity tracker: two staging tables that live for the run,
/// plus the edges left pending when it was last saved.
///
/// Serializable so a file-backed run can snapshot and resume it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityTracker {
    vertices: StagingTable,
    edges: StagingTable,
    pending: BTreeMap<TrackingKey, PendingEdgeRow>,
}

impl IdentityTracker {
    /// Create an empty tracker with custom tracking schemas.
    #[must_use]
    pub fn new(vertex_schema: ElementSchema, edge_schema: ElementSchema) -> Self {
        Self {
            vertices: StagingTable::new(vertex_schema),
            edges: StagingTable::new(edge_schema),
            pending: BTreeMap::new(),
        }
    }

    /// Create an empty tracker with the default tracking schemas.
    pub fn with_default_schemas() -> Result<Self, GraftError> {
        Ok(Self::new(vertex_tracking_schema()?, edge_tracking_schema()?))
    }

    /// Vertex tracking rows in key order.
    pub fn vertices(&self) -> impl Iterator<Item = (&TrackingKey, &PropertyMap)> {
        self.vertices.rows()
    }

    /// Edge tracking rows in key order.
    pub fn edges(&self) -> impl Iterator<Item = (&TrackingKey, &PropertyMap)> {
        self.edges.rows()
    }
}

/// Exact-mode validation of a tracking row. Engine identifier columns are
/// declared as text but also hold integer identifiers.
pub(crate) fn validate_tracking_row(
    schema: &ElementSchema,
    properties: &PropertyMap,
) -> Result<(), GraftError> {
    schema.validate(properties.keys().map(String::as_str), true)?;
    for (name, value) in properties {
        let declared = schema.get(name).unwrap_or(PropertyType::Text);
        let holds_engine_id = matches!(name.as_str(), ENGINE_ID | FROM_ENGINE_ID | TO_ENGINE_ID)
            && matches!(value, PropertyValue::Int(_) | PropertyValue::Text(_));
        if !holds_engine_id && !value.conforms_to(declared) {
            return Err(SchemaError::TypeMismatch {
                kind: schema.kind().to_string(),
                name: name.clone(),
                expected: declared,
                found: value.property_type(),
            }
            .into());
        }
    }
    Ok(())
}

impl TrackerStore for IdentityTracker {
    fn vertex_schema(&self) -> &ElementSchema {
        self.vertices.schema()
    }

    fn edge_schema(&self) -> &ElementSchema {
        self.edges.schema()
    }

    fn vertex_exists(&self, key: &TrackingKey) -> Result<bool, GraftError> {
        Ok(self.vertices.exists(key))
    }

    fn get_vertex(&self, key: &TrackingKey) -> Result<Option<PropertyMap>, GraftError> {
        Ok(self.vertices.get(key).cloned())
    }

    fn record_vertex(
        &mut self,
        key: &TrackingKey,
        properties: PropertyMap,
        check_schema: bool,
    ) -> Result<(), GraftError> {
        if check_schema {
            validate_tracking_row(self.vertices.schema(), &properties)?;
        }
        self.vertices.stage(key.clone(), properties, false)
    }

    fn edge_exists(&self, key: &TrackingKey) -> Result<bool, GraftError> {
        Ok(self.edges.exists(key))
    }

    fn get_edge(&self, key: &TrackingKey) -> Result<Option<PropertyMap>, GraftError> {
        Ok(self.edges.get(key).cloned())
    }

    fn record_edge(
        &mut self,
        key: &TrackingKey,
        properties: PropertyMap,
        check_schema: bool,
    ) -> Result<(), GraftError> {
        if check_schema {
            validate_tracking_row(self.edges.schema(), &properties)?;
        }
        self.edges.stage(key.clone(), properties, false)
    }

    fn vertex_count(&self) -> Result<usize, GraftError> {
        Ok(self.vertices.len())
    }

    fn edge_count(&self) -> Result<usize, GraftError> {
        Ok(self.edges.len())
    }

    fn pending_edges(&self) -> Result<Vec<(TrackingKey, PendingEdgeRow)>, GraftError> {
        Ok(self
            .pending
            .iter()
            .map(|(key, row)| (key.clone(), row.clone()))
            .collect())
    }

    fn store_pending_edges(
        &mut self,
        edges: Vec<(TrackingKey, PendingEdgeRow)>,
    ) -> Result<(), GraftError> {
        self.pending = edges.into_iter().collect();
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
