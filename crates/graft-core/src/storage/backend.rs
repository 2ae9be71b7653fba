//! # Tracker Backends
//!
//! Lets a caller pick the tracker implementation at runtime without making
//! everything above it generic.
//!
//! - `InMemory`: an `IdentityTracker`. Volatile unless the caller snapshots
//!   it with `formats::tracker_to_bytes`.
//! - `Persistent`: a `RedbTracker`. Every record is committed as it happens.

use super::RedbTracker;
use crate::key::TrackingKey;
use crate::schema::ElementSchema;
use crate::tracker::{IdentityTracker, PendingEdgeRow, TrackerStore};
use crate::types::{GraftError, PropertyMap};

/// Storage backend for the identity tracker.
#[derive(Debug)]
pub enum TrackerBackend {
    InMemory(IdentityTracker),
    Persistent(RedbTracker),
}

impl TrackerBackend {
    /// The in-memory tracker, if this is the in-memory backend.
    #[must_use]
    pub fn as_memory(&self) -> Option<&IdentityTracker> {
        match self {
            Self::InMemory(tracker) => Some(tracker),
            Self::Persistent(_) => None,
        }
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::Persistent(_))
    }
}

impl From<IdentityTracker> for TrackerBackend {
    fn from(tracker: IdentityTracker) -> Self {
        Self::InMemory(tracker)
    }
}

impl From<RedbTracker> for TrackerBackend {
    fn from(tracker: RedbTracker) -> Self {
        Self::Persistent(tracker)
    }
}

macro_rules! dispatch {
    ($self:ident, $t:ident => $body:expr) => {
        match $self {
            TrackerBackend::InMemory($t) => $body,
            TrackerBackend::Persistent($t) => $body,
        }
    };
}

impl TrackerStore for TrackerBackend {
    fn vertex_schema(&self) -> &ElementSchema {
        dispatch!(self, t => t.vertex_schema())
    }

    fn edge_schema(&self) -> &ElementSchema {
        dispatch!(self, t => t.edge_schema())
    }

    fn vertex_exists(&self, key: &TrackingKey) -> Result<bool, GraftError> {
        dispatch!(self, t => t.vertex_exists(key))
    }

    fn get_vertex(&self, key: &TrackingKey) -> Result<Option<PropertyMap>, GraftError> {
        dispatch!(self, t => t.get_vertex(key))
    }

    fn record_vertex(
        &mut self,
        key: &TrackingKey,
        properties: PropertyMap,
        check_schema: bool,
    ) -> Result<(), GraftError> {
        dispatch!(self, t => t.record_vertex(key, properties, check_schema))
    }

    fn edge_exists(&self, key: &TrackingKey) -> Result<bool, GraftError> {
        dispatch!(self, t => t.edge_exists(key))
    }

    fn get_edge(&self, key: &TrackingKey) -> Result<Option<PropertyMap>, GraftError> {
        dispatch!(self, t => t.get_edge(key))
    }

    fn record_edge(
        &mut self,
        key: &TrackingKey,
        properties: PropertyMap,
        check_schema: bool,
    ) -> Result<(), GraftError> {
        dispatch!(self, t => t.record_edge(key, properties, check_schema))
    }

    fn vertex_count(&self) -> Result<usize, GraftError> {
        dispatch!(self, t => t.vertex_count())
    }

    fn edge_count(&self) -> Result<usize, GraftError> {
        dispatch!(self, t => t.edge_count())
    }

    fn pending_edges(&self) -> Result<Vec<(TrackingKey, PendingEdgeRow)>, GraftError> {
        dispatch!(self, t => t.pending_edges())
    }

    fn store_pending_edges(
        &mut self,
        edges: Vec<(TrackingKey, PendingEdgeRow)>,
    ) -> Result<(), GraftError> {
        dispatch!(self, t => t.store_pending_edges(edges))
    }
}
