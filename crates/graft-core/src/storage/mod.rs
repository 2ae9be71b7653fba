//! # Persistent Storage
//!
//! Disk-backed implementations of `TrackerStore`, and the runtime backend
//! switch.

mod backend;
mod redb_tracker;

pub use backend::TrackerBackend;
pub use redb_tracker::RedbTracker;
