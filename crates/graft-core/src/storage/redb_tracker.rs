//! # redb-backed Identity Tracker
//!
//! A disk-backed `TrackerStore` using the redb embedded database, so an
//! interrupted run can resume without re-creating elements the engine already
//! holds.
//!
//! Every `record_*` call commits its own write transaction. A key that is in
//! the database was therefore accepted by the engine before the process
//! stopped. Pending edges are replaced as a set in one transaction.

use crate::key::TrackingKey;
use crate::schema::ElementSchema;
use crate::tracker::{PendingEdgeRow, TrackerStore, validate_tracking_row};
use crate::types::{GraftError, PropertyMap};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::Path;

/// Tables keyed by tracking key (or schema slot) holding postcard bytes.
type Table = TableDefinition<'static, &'static str, &'static [u8]>;

/// Vertex tracking rows: tracking key -> postcard-encoded `PropertyMap`.
const VERTICES: Table = TableDefinition::new("vertex_tracking");

/// Edge tracking rows: tracking key -> postcard-encoded `PropertyMap`.
const EDGES: Table = TableDefinition::new("edge_tracking");

/// Edges staged but not created: tracking key -> postcard-encoded `PendingEdgeRow`.
const PENDING: Table = TableDefinition::new("pending_edges");

/// Tracking schemas the database was created with: "vertex"/"edge" -> postcard bytes.
const SCHEMAS: Table = TableDefinition::new("schemas");

fn io(e: impl std::fmt::Display) -> GraftError {
    GraftError::IoError(e.to_string())
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, GraftError> {
    postcard::to_allocvec(value).map_err(|e| GraftError::SerializationError(e.to_string()))
}

fn decode<'a, T: serde::Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, GraftError> {
    postcard::from_bytes(bytes).map_err(|e| GraftError::SerializationError(e.to_string()))
}

/// A disk-backed identity tracker.
pub struct RedbTracker {
    db: Database,
    vertex_schema: ElementSchema,
    edge_schema: ElementSchema,
}

impl std::fmt::Debug for RedbTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbTracker")
            .field("vertex_schema", &self.vertex_schema.kind())
            .field("edge_schema", &self.edge_schema.kind())
            .finish_non_exhaustive()
    }
}

impl RedbTracker {
    /// Open or create a tracker database at `path`.
    ///
    /// A new database stores the given schemas. An existing one must have been
    /// created with identical schemas, otherwise `IncompatibleTracker`.
    pub fn open(
        path: impl AsRef<Path>,
        vertex_schema: ElementSchema,
        edge_schema: ElementSchema,
    ) -> Result<Self, GraftError> {
        let db = Database::create(path.as_ref()).map_err(io)?;

        let write_txn = db.begin_write().map_err(io)?;
        {
            let _ = write_txn.open_table(VERTICES).map_err(io)?;
            let _ = write_txn.open_table(EDGES).map_err(io)?;
            let _ = write_txn.open_table(PENDING).map_err(io)?;
            let mut schemas = write_txn.open_table(SCHEMAS).map_err(io)?;

            for (slot, schema) in [("vertex", &vertex_schema), ("edge", &edge_schema)] {
                let stored = schemas
                    .get(slot)
                    .map_err(io)?
                    .map(|guard| decode::<ElementSchema>(guard.value()))
                    .transpose()?;
                match stored {
                    Some(existing) if &existing != schema => {
                        return Err(GraftError::IncompatibleTracker(format!(
                            "{slot} tracking schema '{}' differs from stored '{}'",
                            schema.kind(),
                            existing.kind()
                        )));
                    }
                    Some(_) => {}
                    None => {
                        let bytes = encode(schema)?;
                        schemas.insert(slot, bytes.as_slice()).map_err(io)?;
                    }
                }
            }
        }
        write_txn.commit().map_err(io)?;

        Ok(Self {
            db,
            vertex_schema,
            edge_schema,
        })
    }

    /// Compact the database file.
    pub fn compact(&mut self) -> Result<(), GraftError> {
        self.db.compact().map_err(io)?;
        Ok(())
    }

    fn exists(&self, table: Table, key: &TrackingKey) -> Result<bool, GraftError> {
        let read_txn = self.db.begin_read().map_err(io)?;
        let table = read_txn.open_table(table).map_err(io)?;
        Ok(table.get(key.as_str()).map_err(io)?.is_some())
    }

    fn get(
        &self,
        table: Table,
        key: &TrackingKey,
    ) -> Result<Option<PropertyMap>, GraftError> {
        let read_txn = self.db.begin_read().map_err(io)?;
        let table = read_txn.open_table(table).map_err(io)?;
        table
            .get(key.as_str())
            .map_err(io)?
            .map(|guard| decode::<PropertyMap>(guard.value()))
            .transpose()
    }

    fn put(
        &mut self,
        table: Table,
        key: &TrackingKey,
        properties: &PropertyMap,
    ) -> Result<(), GraftError> {
        let bytes = encode(properties)?;
        let write_txn = self.db.begin_write().map_err(io)?;
        {
            let mut table = write_txn.open_table(table).map_err(io)?;
            table.insert(key.as_str(), bytes.as_slice()).map_err(io)?;
        }
        write_txn.commit().map_err(io)?;
        Ok(())
    }

    fn count(&self, table: Table) -> Result<usize, GraftError> {
        let read_txn = self.db.begin_read().map_err(io)?;
        let table = read_txn.open_table(table).map_err(io)?;
        Ok(table.len().map_err(io)? as usize)
    }
}

impl TrackerStore for RedbTracker {
    fn vertex_schema(&self) -> &ElementSchema {
        &self.vertex_schema
    }

    fn edge_schema(&self) -> &ElementSchema {
        &self.edge_schema
    }

    fn vertex_exists(&self, key: &TrackingKey) -> Result<bool, GraftError> {
        self.exists(VERTICES, key)
    }

    fn get_vertex(&self, key: &TrackingKey) -> Result<Option<PropertyMap>, GraftError> {
        self.get(VERTICES, key)
    }

    fn record_vertex(
        &mut self,
        key: &TrackingKey,
        properties: PropertyMap,
        check_schema: bool,
    ) -> Result<(), GraftError> {
        if check_schema {
            validate_tracking_row(&self.vertex_schema, &properties)?;
        }
        self.put(VERTICES, key, &properties)
    }

    fn edge_exists(&self, key: &TrackingKey) -> Result<bool, GraftError> {
        self.exists(EDGES, key)
    }

    fn get_edge(&self, key: &TrackingKey) -> Result<Option<PropertyMap>, GraftError> {
        self.get(EDGES, key)
    }

    fn record_edge(
        &mut self,
        key: &TrackingKey,
        properties: PropertyMap,
        check_schema: bool,
    ) -> Result<(), GraftError> {
        if check_schema {
            validate_tracking_row(&self.edge_schema, &properties)?;
        }
        self.put(EDGES, key, &properties)
    }

    fn vertex_count(&self) -> Result<usize, GraftError> {
        self.count(VERTICES)
    }

    fn edge_count(&self) -> Result<usize, GraftError> {
        self.count(EDGES)
    }

    fn pending_edges(&self) -> Result<Vec<(TrackingKey, PendingEdgeRow)>, GraftError> {
        let read_txn = self.db.begin_read().map_err(io)?;
        let table = read_txn.open_table(PENDING).map_err(io)?;

        let mut edges = Vec::new();
        for entry in table.iter().map_err(io)? {
            let (key, value) = entry.map_err(io)?;
            let key = TrackingKey::try_from(key.value().to_string())?;
            edges.push((key, decode::<PendingEdgeRow>(value.value())?));
        }
        Ok(edges)
    }

    fn store_pending_edges(
        &mut self,
        edges: Vec<(TrackingKey, PendingEdgeRow)>,
    ) -> Result<(), GraftError> {
        let write_txn = self.db.begin_write().map_err(io)?;
        write_txn.delete_table(PENDING).map_err(io)?;
        {
            let mut table = write_txn.open_table(PENDING).map_err(io)?;
            for (key, row) in &edges {
                let bytes = encode(row)?;
                table.insert(key.as_str(), bytes.as_slice()).map_err(io)?;
            }
        }
        write_txn.commit().map_err(io)?;
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
