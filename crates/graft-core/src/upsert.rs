//! # Upsert Orchestrator
//!
//! Turns the entities a source record implies into remote writes, consulting
//! the identity tracker before every create.
//!
//! ## Protocol
//!
//! - Unseen vertex: stage and validate a tagged property set, create it
//!   remotely, record the engine identifier.
//! - Seen vertex: reuse the identifier, optionally send an update (tags
//!   reapplied). The tracked identifier never changes.
//! - Edges: staged under a key derived from a prefix and both endpoint keys,
//!   created once both endpoints are tracked. Tracked edges are never updated.
//!
//! Within one record every vertex is resolved before any edge is sent. A
//! remote failure is never recorded in the tracker.
//!
//! Edges still pending when a run ends are saved with the tracker and
//! restored by the next orchestrator built on it.

use crate::client::GraphClient;
use crate::key::TrackingKey;
use crate::primitives::{ELEMENT_CREATED_AT, ELEMENT_LABEL, ELEMENT_UPDATED_AT};
use crate::record::SourceRecord;
use crate::schema::{ElementSchema, GraphModel};
use crate::staging::{IngestTags, StagingArea};
use crate::tracker::{PendingEdgeRow, TrackedEdge, TrackedVertex, TrackerStore};
use crate::types::{EngineId, GraftError, PropertyMap, PropertyValue, RemoteError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

// =============================================================================
// OPTIONS
// =============================================================================

/// When staged edges are sent to the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeFlush {
    /// At the end of the record that staged them, when both endpoints are
    /// tracked. Unresolved edges wait for an explicit flush.
    #[default]
    PerRecord,
    /// Only on an explicit `flush_edges`, typically once at the end of a run.
    Deferred,
}

/// What to do with a referenced vertex that has not been seen yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ForwardRefs {
    /// Create a partial vertex now; a later record fills it in via update.
    #[default]
    Placeholder,
    /// Create nothing; edges to it stay pending until it is tracked.
    Defer,
}

/// Bounded resubmission of remote writes that failed transiently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per write, the first one included. `1` disables retry.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

/// Orchestrator behaviour switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOptions {
    pub edge_flush: EdgeFlush,
    pub forward_refs: ForwardRefs,
    pub retry: RetryPolicy,
    /// Validate staged and tracked property sets against their schemas.
    pub check_schema: bool,
}

impl Default for UpsertOptions {
    fn default() -> Self {
        Self {
            edge_flush: EdgeFlush::default(),
            forward_refs: ForwardRefs::default(),
            retry: RetryPolicy::default(),
            check_schema: true,
        }
    }
}

// =============================================================================
// OUTCOMES
// =============================================================================

/// One thing the orchestrator did (or decided not to do) for a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    CreatedVertex(TrackingKey),
    UpdatedVertex(TrackingKey),
    ReusedVertex(TrackingKey),
    CreatedEdge(TrackingKey),
    /// The edge was already tracked; nothing was sent.
    SkippedEdge(TrackingKey),
    /// The edge is staged but at least one endpoint is not tracked yet.
    DeferredEdge(TrackingKey),
}

impl Action {
    #[must_use]
    pub fn key(&self) -> &TrackingKey {
        match self {
            Self::CreatedVertex(k)
            | Self::UpdatedVertex(k)
            | Self::ReusedVertex(k)
            | Self::CreatedEdge(k)
            | Self::SkippedEdge(k)
            | Self::DeferredEdge(k) => k,
        }
    }
}

/// Identifies a source record in logs and failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRef {
    /// Zero-based position in the feed.
    pub position: usize,
    pub kind: String,
    /// The record's `Id` field, when it has one.
    pub source_id: Option<String>,
}

impl RecordRef {
    #[must_use]
    pub fn new(position: usize, record: &SourceRecord) -> Self {
        Self {
            position,
            kind: record.kind().to_string(),
            source_id: record.get("Id").map(PropertyValue::to_string),
        }
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source_id {
            Some(id) => write!(f, "record #{} ({} {})", self.position, self.kind, id),
            None => write!(f, "record #{} ({})", self.position, self.kind),
        }
    }
}

/// A record that was ingested completely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOutcome {
    pub record: RecordRef,
    pub actions: Vec<Action>,
}

/// A record that stopped part-way.
///
/// `completed` lists what already reached the engine (and the tracker) before
/// the failure; those writes stand.
#[derive(Debug, Error)]
#[error("{record} failed{}: {source}", at_key(.key))]
pub struct RecordFailure {
    pub record: RecordRef,
    /// The entity being processed when the record failed.
    pub key: Option<TrackingKey>,
    pub completed: Vec<Action>,
    #[source]
    pub source: GraftError,
}

fn at_key(key: &Option<TrackingKey>) -> String {
    key.as_ref().map(|k| format!(" at '{k}'")).unwrap_or_default()
}

/// Outcome of one edge flush.
#[derive(Debug, Default)]
pub struct EdgeFlushReport {
    pub created: Vec<TrackingKey>,
    /// Pending edges that turned out to be tracked already; dropped.
    pub already_tracked: Vec<TrackingKey>,
    /// At least one endpoint is untracked; still pending.
    pub unresolved: Vec<TrackingKey>,
    /// The engine refused or failed the create; still pending.
    pub failed: Vec<(TrackingKey, GraftError)>,
}

/// Running totals across every record handled by one orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertStats {
    pub vertices_created: usize,
    pub vertices_updated: usize,
    pub vertices_reused: usize,
    pub edges_created: usize,
    pub edges_skipped: usize,
}

impl UpsertStats {
    /// Totals accumulated since `earlier` was taken.
    #[must_use]
    pub fn since(&self, earlier: &Self) -> Self {
        Self {
            vertices_created: self.vertices_created.saturating_sub(earlier.vertices_created),
            vertices_updated: self.vertices_updated.saturating_sub(earlier.vertices_updated),
            vertices_reused: self.vertices_reused.saturating_sub(earlier.vertices_reused),
            edges_created: self.edges_created.saturating_sub(earlier.edges_created),
            edges_skipped: self.edges_skipped.saturating_sub(earlier.edges_skipped),
        }
    }
}

// =============================================================================
// RECORD MAPPING
// =============================================================================

/// Maps the records of one dataset onto vertices and edges.
pub trait RecordMapper {
    /// The element schemas the mapping writes.
    fn graph_model(&self) -> Result<GraphModel, GraftError>;

    /// Upsert every entity `record` implies.
    fn ingest<C: GraphClient, T: TrackerStore>(
        &self,
        upserter: &mut Upserter<C, T>,
        record: &SourceRecord,
    ) -> Result<(), GraftError>;
}

// =============================================================================
// UPSERTER
// =============================================================================

#[derive(Debug, Clone)]
struct PendingEdge {
    from: TrackingKey,
    to: TrackingKey,
    label: String,
    /// The record that first staged the edge in this run; `None` when it was
    /// restored from the tracker.
    origin: Option<RecordRef>,
}

#[derive(Debug)]
struct RecordScope {
    record: RecordRef,
    actions: Vec<Action>,
    current: Option<TrackingKey>,
    staged_edges: Vec<TrackingKey>,
}

impl RecordScope {
    fn new(record: RecordRef) -> Self {
        Self {
            record,
            actions: Vec::new(),
            current: None,
            staged_edges: Vec::new(),
        }
    }
}

enum EdgeResolution {
    Created,
    AlreadyTracked,
    Unresolved,
}

/// The single writer of an ingestion run.
///
/// Owns the remote client, the identity tracker and the staging area, so the
/// check-create-record sequence cannot interleave with another writer.
pub struct Upserter<C, T> {
    client: C,
    tracker: T,
    model: GraphModel,
    staging: StagingArea,
    tags: Option<IngestTags>,
    options: UpsertOptions,
    pending: BTreeMap<TrackingKey, PendingEdge>,
    stats: UpsertStats,
    scope: Option<RecordScope>,
}

impl<C: GraphClient, T: TrackerStore> Upserter<C, T> {
    /// Create an orchestrator. With `tags`, every written element carries the
    /// full tag set and the staging schemas admit the tag columns.
    ///
    /// Pending edges saved in `tracker` by an earlier run are staged again.
    pub fn new(
        client: C,
        tracker: T,
        model: GraphModel,
        tags: Option<IngestTags>,
        options: UpsertOptions,
    ) -> Result<Self, GraftError> {
        let staging = StagingArea::new(&model, tags.as_ref())?;
        let mut upserter = Self {
            client,
            tracker,
            model,
            staging,
            tags,
            options,
            pending: BTreeMap::new(),
            stats: UpsertStats::default(),
            scope: None,
        };
        upserter.restore_pending_edges()?;
        Ok(upserter)
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    pub fn model(&self) -> &GraphModel {
        &self.model
    }

    pub fn options(&self) -> &UpsertOptions {
        &self.options
    }

    pub fn stats(&self) -> UpsertStats {
        self.stats
    }

    /// Keys of staged edges not yet created, in key order.
    pub fn pending_edges(&self) -> impl Iterator<Item = &TrackingKey> {
        self.pending.keys()
    }

    pub fn pending_edge_count(&self) -> usize {
        self.pending.len()
    }

    /// Give back the client and the tracker. Pending edges not yet saved with
    /// `save_pending_edges` are dropped.
    pub fn into_parts(self) -> (C, T) {
        (self.client, self.tracker)
    }

    // -------------------------------------------------------------------------
    // Vertices
    // -------------------------------------------------------------------------

    /// Create the vertex under `key` if it is untracked, otherwise reuse it.
    ///
    /// On a hit, `update` (when given) is sent as an update of the tracked
    /// vertex; without it the vertex is only reused. Returns the engine
    /// identifier either way.
    pub fn upsert_vertex(
        &mut self,
        label: &str,
        key: &TrackingKey,
        properties: PropertyMap,
        update: Option<PropertyMap>,
    ) -> Result<EngineId, GraftError> {
        self.focus(key);
        let mut attempt = 1;
        loop {
            if let Some(id) = self.tracker.vertex_engine_id(key)? {
                return match update {
                    Some(update) => self.update_tracked(label, key, id, update),
                    None => {
                        self.stats.vertices_reused += 1;
                        self.note(Action::ReusedVertex(key.clone()));
                        Ok(id)
                    }
                };
            }

            let staged = self.stage_vertex(label, key, properties.clone(), true)?;
            match self.client.create_vertex(label, &staged) {
                Ok(id) => {
                    self.tracker.record_vertex(
                        key,
                        TrackedVertex::properties(&id),
                        self.options.check_schema,
                    )?;
                    debug!(key = %key, label, id = %id, "vertex created");
                    self.stats.vertices_created += 1;
                    self.note(Action::CreatedVertex(key.clone()));
                    return Ok(id);
                }
                Err(e) if self.should_retry(&e, attempt) => {
                    warn!(key = %key, attempt, error = %e, "vertex create failed, retrying");
                    attempt += 1;
                }
                Err(source) => {
                    return Err(GraftError::RemoteWrite {
                        key: key.clone(),
                        source,
                    });
                }
            }
        }
    }

    /// Resolve a vertex another entity points at.
    ///
    /// A tracked vertex is reused. An untracked one becomes a placeholder built
    /// from `placeholder`, or is left alone under `ForwardRefs::Defer`, in
    /// which case `None` is returned and edges to it stay pending.
    pub fn reference_vertex(
        &mut self,
        label: &str,
        key: &TrackingKey,
        placeholder: PropertyMap,
    ) -> Result<Option<EngineId>, GraftError> {
        self.focus(key);
        if let Some(id) = self.tracker.vertex_engine_id(key)? {
            self.stats.vertices_reused += 1;
            self.note(Action::ReusedVertex(key.clone()));
            return Ok(Some(id));
        }
        match self.options.forward_refs {
            ForwardRefs::Placeholder => self.upsert_vertex(label, key, placeholder, None).map(Some),
            ForwardRefs::Defer => {
                debug!(key = %key, label, "forward reference deferred");
                Ok(None)
            }
        }
    }

    fn update_tracked(
        &mut self,
        label: &str,
        key: &TrackingKey,
        id: EngineId,
        update: PropertyMap,
    ) -> Result<EngineId, GraftError> {
        let staged = self.stage_vertex(label, key, update, false)?;
        let mut attempt = 1;
        loop {
            match self.client.update_vertex(&id, &staged) {
                Ok(()) => {
                    debug!(key = %key, id = %id, "vertex updated");
                    self.stats.vertices_updated += 1;
                    self.note(Action::UpdatedVertex(key.clone()));
                    return Ok(id);
                }
                Err(e) if self.should_retry(&e, attempt) => {
                    warn!(key = %key, attempt, error = %e, "vertex update failed, retrying");
                    attempt += 1;
                }
                Err(source) => {
                    return Err(GraftError::RemoteWrite {
                        key: key.clone(),
                        source,
                    });
                }
            }
        }
    }

    /// Decorate, validate and stage a vertex property set, then take it back
    /// out for sending.
    fn stage_vertex(
        &mut self,
        label: &str,
        key: &TrackingKey,
        mut properties: PropertyMap,
        created: bool,
    ) -> Result<PropertyMap, GraftError> {
        let table = self.staging.vertex_table_mut(label)?;
        decorate(
            table.schema(),
            self.tags.as_ref(),
            label,
            &mut properties,
            Utc::now(),
            created,
        );
        table.stage(key.clone(), properties, self.options.check_schema)?;
        table
            .take(key)
            .ok_or_else(|| GraftError::NotFound(key.clone()))
    }

    // -------------------------------------------------------------------------
    // Edges
    // -------------------------------------------------------------------------

    /// Stage the edge `prefix-from-to` labelled `label`.
    ///
    /// An already tracked edge is skipped. Restaging a pending edge replaces
    /// its properties. When the edge is sent depends on `EdgeFlush`.
    pub fn stage_edge(
        &mut self,
        prefix: &str,
        from: &TrackingKey,
        to: &TrackingKey,
        label: &str,
        mut properties: PropertyMap,
    ) -> Result<TrackingKey, GraftError> {
        let key = TrackingKey::edge(prefix, from, to)?;
        self.focus(&key);
        if self.tracker.edge_exists(&key)? {
            self.stats.edges_skipped += 1;
            self.note(Action::SkippedEdge(key.clone()));
            return Ok(key);
        }

        let table = self.staging.edges_mut();
        decorate(
            table.schema(),
            self.tags.as_ref(),
            label,
            &mut properties,
            Utc::now(),
            true,
        );
        table.stage(key.clone(), properties, self.options.check_schema)?;

        // A restaged edge keeps the record that first staged it
        let origin = match self.pending.get(&key) {
            Some(existing) => existing.origin.clone(),
            None => self.scope.as_ref().map(|s| s.record.clone()),
        };
        self.pending.insert(
            key.clone(),
            PendingEdge {
                from: from.clone(),
                to: to.clone(),
                label: label.to_string(),
                origin,
            },
        );
        if let Some(scope) = &mut self.scope {
            if !scope.staged_edges.contains(&key) {
                scope.staged_edges.push(key.clone());
            }
        }
        Ok(key)
    }

    /// Try every pending edge once.
    ///
    /// Remote failures are collected in the report and the edge stays
    /// pending; tracker failures abort the flush.
    pub fn flush_edges(&mut self) -> Result<EdgeFlushReport, GraftError> {
        let keys: Vec<TrackingKey> = self.pending.keys().cloned().collect();
        let mut report = EdgeFlushReport::default();
        for key in keys {
            match self.create_pending_edge(&key) {
                Ok(EdgeResolution::Created) => report.created.push(key),
                Ok(EdgeResolution::AlreadyTracked) => report.already_tracked.push(key),
                Ok(EdgeResolution::Unresolved) => report.unresolved.push(key),
                Err(e) if e.is_remote() => {
                    warn!(key = %key, error = %e, "edge create failed, left pending");
                    report.failed.push((key, e));
                }
                Err(e) => return Err(e),
            }
        }
        debug!(
            created = report.created.len(),
            unresolved = report.unresolved.len(),
            failed = report.failed.len(),
            "edges flushed"
        );
        Ok(report)
    }

    fn create_pending_edge(&mut self, key: &TrackingKey) -> Result<EdgeResolution, GraftError> {
        let pending = self
            .pending
            .get(key)
            .cloned()
            .ok_or_else(|| GraftError::NotFound(key.clone()))?;
        self.focus(key);

        if self.tracker.edge_exists(key)? {
            self.drop_pending(key);
            self.stats.edges_skipped += 1;
            self.note(Action::SkippedEdge(key.clone()));
            return Ok(EdgeResolution::AlreadyTracked);
        }

        let from = self.tracker.vertex_engine_id(&pending.from)?;
        let to = self.tracker.vertex_engine_id(&pending.to)?;
        let (Some(from), Some(to)) = (from, to) else {
            return Ok(EdgeResolution::Unresolved);
        };

        let properties = self.staging.edges().require(key)?.clone();
        let mut attempt = 1;
        loop {
            match self
                .client
                .create_edge(&from, &to, &pending.label, &properties)
            {
                Ok(()) => {
                    self.tracker.record_edge(
                        key,
                        TrackedEdge::properties(&from, &to, &pending.label),
                        self.options.check_schema,
                    )?;
                    self.drop_pending(key);
                    debug!(key = %key, label = %pending.label, "edge created");
                    self.stats.edges_created += 1;
                    self.note(Action::CreatedEdge(key.clone()));
                    return Ok(EdgeResolution::Created);
                }
                Err(e) if self.should_retry(&e, attempt) => {
                    warn!(key = %key, attempt, error = %e, "edge create failed, retrying");
                    attempt += 1;
                    if self.tracker.edge_exists(key)? {
                        self.drop_pending(key);
                        return Ok(EdgeResolution::AlreadyTracked);
                    }
                }
                Err(source) => {
                    return Err(GraftError::RemoteWrite {
                        key: key.clone(),
                        source,
                    });
                }
            }
        }
    }

    /// Save every pending edge in the tracker, replacing what an earlier save
    /// left there.
    pub fn save_pending_edges(&mut self) -> Result<(), GraftError> {
        let mut rows = Vec::with_capacity(self.pending.len());
        for (key, edge) in &self.pending {
            rows.push((
                key.clone(),
                PendingEdgeRow {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                    label: edge.label.clone(),
                    properties: self.staging.edges().require(key)?.clone(),
                },
            ));
        }
        debug!(count = rows.len(), "pending edges saved");
        self.tracker.store_pending_edges(rows)
    }

    fn restore_pending_edges(&mut self) -> Result<(), GraftError> {
        let rows = self.tracker.pending_edges()?;
        if !rows.is_empty() {
            debug!(count = rows.len(), "pending edges restored");
        }
        for (key, row) in rows {
            // Validated when first staged
            self.staging
                .edges_mut()
                .stage(key.clone(), row.properties, false)?;
            self.pending.insert(
                key,
                PendingEdge {
                    from: row.from,
                    to: row.to,
                    label: row.label,
                    origin: None,
                },
            );
        }
        Ok(())
    }

    fn drop_pending(&mut self, key: &TrackingKey) {
        self.pending.remove(key);
        self.staging.edges_mut().take(key);
    }

    // -------------------------------------------------------------------------
    // Records
    // -------------------------------------------------------------------------

    /// Ingest one record through `mapper`.
    ///
    /// On failure the writes that already succeeded stand and are listed in
    /// the `RecordFailure`; edges first staged by this record and not created
    /// are discarded. Edges an earlier record staged stay pending.
    pub fn ingest<M: RecordMapper>(
        &mut self,
        mapper: &M,
        record: &SourceRecord,
        position: usize,
    ) -> Result<RecordOutcome, RecordFailure> {
        let record_ref = RecordRef::new(position, record);
        self.scope = Some(RecordScope::new(record_ref.clone()));

        let result = mapper
            .ingest(self, record)
            .and_then(|()| self.finish_record_edges());
        let scope = self
            .scope
            .take()
            .unwrap_or_else(|| RecordScope::new(record_ref));

        match result {
            Ok(()) => Ok(RecordOutcome {
                record: scope.record,
                actions: scope.actions,
            }),
            Err(source) => {
                for key in &scope.staged_edges {
                    let owned = self
                        .pending
                        .get(key)
                        .is_some_and(|p| p.origin.as_ref() == Some(&scope.record));
                    if owned {
                        self.drop_pending(key);
                    }
                }
                let key = failing_key(&source).or(scope.current);
                Err(RecordFailure {
                    record: scope.record,
                    key,
                    completed: scope.actions,
                    source,
                })
            }
        }
    }

    fn finish_record_edges(&mut self) -> Result<(), GraftError> {
        let staged = self
            .scope
            .as_ref()
            .map(|s| s.staged_edges.clone())
            .unwrap_or_default();
        for key in staged {
            if !self.pending.contains_key(&key) {
                continue;
            }
            let resolution = match self.options.edge_flush {
                EdgeFlush::PerRecord => self.create_pending_edge(&key)?,
                EdgeFlush::Deferred => EdgeResolution::Unresolved,
            };
            if let EdgeResolution::Unresolved = resolution {
                self.note(Action::DeferredEdge(key));
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn should_retry(&self, error: &RemoteError, attempt: u32) -> bool {
        error.is_retryable() && attempt < self.options.retry.max_attempts
    }

    fn focus(&mut self, key: &TrackingKey) {
        if let Some(scope) = &mut self.scope {
            scope.current = Some(key.clone());
        }
    }

    fn note(&mut self, action: Action) {
        if let Some(scope) = &mut self.scope {
            scope.actions.push(action);
        }
    }
}

impl<C, T> fmt::Debug for Upserter<C, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upserter")
            .field("options", &self.options)
            .field("pending", &self.pending.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

/// Add the bookkeeping columns `schema` declares, plus the tag set.
fn decorate(
    schema: &ElementSchema,
    tags: Option<&IngestTags>,
    label: &str,
    properties: &mut PropertyMap,
    now: DateTime<Utc>,
    created: bool,
) {
    if created {
        if schema.contains(ELEMENT_LABEL) {
            properties
                .entry(ELEMENT_LABEL.to_string())
                .or_insert_with(|| PropertyValue::from(label));
        }
        if schema.contains(ELEMENT_CREATED_AT) {
            properties.insert(ELEMENT_CREATED_AT.to_string(), PropertyValue::Timestamp(now));
        }
    }
    if schema.contains(ELEMENT_UPDATED_AT) {
        properties.insert(ELEMENT_UPDATED_AT.to_string(), PropertyValue::Timestamp(now));
    }
    if let Some(tags) = tags {
        tags.tag(properties);
    }
}

fn failing_key(error: &GraftError) -> Option<TrackingKey> {
    match error {
        GraftError::RemoteWrite { key, .. } | GraftError::NotFound(key) => Some(key.clone()),
        _ => None,
    }
}

// =============================================================================
// TESTS
// =============================================================================
