//! # Remote Graph Client
//!
//! The contract the orchestrator writes through, plus `MemoryGraph`, an
//! in-process engine used for dry runs and tests.
//!
//! Connection handling belongs to the implementor: the orchestrator receives
//! an already-open client and never reconnects.

use crate::types::{EngineId, PropertyMap, RemoteError};
use std::collections::BTreeMap;

// =============================================================================
// GRAPHCLIENT TRAIT
// =============================================================================

/// Write operations against a remote property-graph engine.
pub trait GraphClient {
    /// Create a vertex and return the identifier the engine assigned.
    fn create_vertex(&mut self, label: &str, properties: &PropertyMap)
    -> Result<EngineId, RemoteError>;

    /// Create an edge between two existing vertices.
    fn create_edge(
        &mut self,
        from: &EngineId,
        to: &EngineId,
        label: &str,
        properties: &PropertyMap,
    ) -> Result<(), RemoteError>;

    /// Set `properties` on an existing vertex, leaving other properties as
    /// they are.
    fn update_vertex(&mut self, id: &EngineId, properties: &PropertyMap)
    -> Result<(), RemoteError>;
}

impl<C: GraphClient + ?Sized> GraphClient for &mut C {
    fn create_vertex(
        &mut self,
        label: &str,
        properties: &PropertyMap,
    ) -> Result<EngineId, RemoteError> {
        (**self).create_vertex(label, properties)
    }

    fn create_edge(
        &mut self,
        from: &EngineId,
        to: &EngineId,
        label: &str,
        properties: &PropertyMap,
    ) -> Result<(), RemoteError> {
        (**self).create_edge(from, to, label, properties)
    }

    fn update_vertex(
        &mut self,
        id: &EngineId,
        properties: &PropertyMap,
    ) -> Result<(), RemoteError> {
        (**self).update_vertex(id, properties)
    }
}

// =============================================================================
// IN-MEMORY ENGINE
// =============================================================================

/// Which client operation a failure rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    CreateVertex,
    CreateEdge,
    UpdateVertex,
}

#[derive(Debug, Clone)]
struct FailureRule {
    operation: Operation,
    label: Option<String>,
    error: RemoteError,
    remaining: usize,
}

/// A vertex held by `MemoryGraph`.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredVertex {
    pub label: String,
    pub properties: PropertyMap,
    pub updates: usize,
}

/// An edge held by `MemoryGraph`.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEdge {
    pub from: EngineId,
    pub to: EngineId,
    pub label: String,
    pub properties: PropertyMap,
}

/// An in-process graph engine with sequential long identifiers.
///
/// Failures can be injected per operation (optionally per label); each rule
/// fires a fixed number of times and is then spent. A failed call leaves the
/// graph unchanged.
#[derive(Debug, Clone, Default)]
pub struct MemoryGraph {
    next_id: i64,
    vertices: BTreeMap<EngineId, StoredVertex>,
    edges: Vec<StoredEdge>,
    failures: Vec<FailureRule>,
    calls: usize,
}

impl MemoryGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` calls of `operation` with `error`.
    pub fn fail(&mut self, operation: Operation, error: RemoteError, times: usize) {
        self.failures.push(FailureRule {
            operation,
            label: None,
            error,
            remaining: times,
        });
    }

    /// Fail the next `times` calls of `operation` on elements labelled `label`.
    pub fn fail_label(
        &mut self,
        operation: Operation,
        label: impl Into<String>,
        error: RemoteError,
        times: usize,
    ) {
        self.failures.push(FailureRule {
            operation,
            label: Some(label.into()),
            error,
            remaining: times,
        });
    }

    fn injected(&mut self, operation: Operation, label: &str) -> Result<(), RemoteError> {
        self.calls += 1;
        let rule = self.failures.iter_mut().find(|rule| {
            rule.remaining > 0
                && rule.operation == operation
                && rule.label.as_deref().is_none_or(|l| l == label)
        });
        match rule {
            Some(rule) => {
                rule.remaining -= 1;
                Err(rule.error.clone())
            }
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn vertex(&self, id: &EngineId) -> Option<&StoredVertex> {
        self.vertices.get(id)
    }

    /// Vertices carrying `label`, in identifier order.
    pub fn vertices_labelled<'a>(
        &'a self,
        label: &'a str,
    ) -> impl Iterator<Item = (&'a EngineId, &'a StoredVertex)> + 'a {
        self.vertices.iter().filter(move |(_, v)| v.label == label)
    }

    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    #[must_use]
    pub fn edges(&self) -> &[StoredEdge] {
        &self.edges
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Total updates applied across all vertices.
    #[must_use]
    pub fn update_count(&self) -> usize {
        self.vertices.values().map(|v| v.updates).sum()
    }

    /// Every client call made, failed ones included.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls
    }
}

impl GraphClient for MemoryGraph {
    fn create_vertex(
        &mut self,
        label: &str,
        properties: &PropertyMap,
    ) -> Result<EngineId, RemoteError> {
        self.injected(Operation::CreateVertex, label)?;
        self.next_id += 1;
        let id = EngineId::Long(self.next_id);
        self.vertices.insert(
            id.clone(),
            StoredVertex {
                label: label.to_string(),
                properties: properties.clone(),
                updates: 0,
            },
        );
        Ok(id)
    }

    fn create_edge(
        &mut self,
        from: &EngineId,
        to: &EngineId,
        label: &str,
        properties: &PropertyMap,
    ) -> Result<(), RemoteError> {
        self.injected(Operation::CreateEdge, label)?;
        for end in [from, to] {
            if !self.vertices.contains_key(end) {
                return Err(RemoteError::Rejected(format!("no vertex with id {end}")));
            }
        }
        self.edges.push(StoredEdge {
            from: from.clone(),
            to: to.clone(),
            label: label.to_string(),
            properties: properties.clone(),
        });
        Ok(())
    }

    fn update_vertex(
        &mut self,
        id: &EngineId,
        properties: &PropertyMap,
    ) -> Result<(), RemoteError> {
        let label = self
            .vertices
            .get(id)
            .map(|v| v.label.clone())
            .unwrap_or_default();
        self.injected(Operation::UpdateVertex, &label)?;
        let vertex = self
            .vertices
            .get_mut(id)
            .ok_or_else(|| RemoteError::Rejected(format!("no vertex with id {id}")))?;
        vertex
            .properties
            .extend(properties.iter().map(|(k, v)| (k.clone(), v.clone())));
        vertex.updates += 1;
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
