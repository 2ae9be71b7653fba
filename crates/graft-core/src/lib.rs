//! # graft-core
//!
//! Idempotent ingestion of tabular source records into a property graph.
//!
//! This crate implements the tracking and staging layer that sits between a
//! record feed and a remote graph engine:
//! - schema-validated staging of vertex and edge property sets
//! - an identity tracker mapping deterministic tracking keys to the
//!   identifiers the engine assigned
//! - an upsert orchestrator that creates each entity at most once and defers
//!   edges until both endpoints exist
//!
//! ## Architectural Constraints
//!
//! - Synchronous and single-writer: one `Upserter` owns the tracker
//! - NO async, NO network dependencies; the engine is reached through the
//!   `GraphClient` trait supplied by the caller
//! - A remote failure never reaches the tracker

// =============================================================================
// MODULES
// =============================================================================

pub mod client;
pub mod formats;
pub mod key;
pub mod primitives;
pub mod record;
pub mod run;
pub mod schema;
pub mod stackoverflow;
pub mod staging;
pub mod storage;
pub mod tracker;
pub mod types;
pub mod upsert;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use key::{KeyParts, TrackingKey};
pub use types::{
    EngineId, GraftError, PropertyMap, PropertyType, PropertyValue, RemoteError, SchemaError,
};

// =============================================================================
// RE-EXPORTS: Staging and Tracking
// =============================================================================

pub use schema::{ElementSchema, GraphModel};
pub use staging::{IngestTags, StagingArea, StagingTable};
pub use storage::{RedbTracker, TrackerBackend};
pub use tracker::{
    IdentityTracker, PendingEdgeRow, TrackedEdge, TrackedVertex, TrackerStore,
    edge_tracking_schema, vertex_tracking_schema,
};

// =============================================================================
// RE-EXPORTS: Ingestion
// =============================================================================

pub use client::{GraphClient, MemoryGraph};
pub use record::SourceRecord;
pub use run::{AbortCause, ErrorPolicy, IngestRun, RunAborted, RunSummary};
pub use stackoverflow::StackOverflow;
pub use upsert::{
    Action, EdgeFlush, EdgeFlushReport, ForwardRefs, RecordFailure, RecordMapper, RecordOutcome,
    RecordRef, RetryPolicy, UpsertOptions, UpsertStats, Upserter,
};

// =============================================================================
// RE-EXPORTS: Formats (from formats module)
// =============================================================================

pub use formats::{SnapshotHeader, tracker_from_bytes, tracker_to_bytes};
