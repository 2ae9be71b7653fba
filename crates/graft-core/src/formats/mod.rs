//! # Serialization Formats
//!
//! On-disk formats owned by the core. Reading and writing files is left to
//! the app layer.

mod snapshot;

pub use snapshot::{SnapshotHeader, tracker_from_bytes, tracker_to_bytes};
