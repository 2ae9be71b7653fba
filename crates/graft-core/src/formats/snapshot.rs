//! # Tracker Snapshot Format
//!
//! Binary serialization of an in-memory `IdentityTracker`, used by the file
//! backend to resume a run. The payload carries the tracking rows and the
//! edges still pending. File I/O happens in the app layer.
//!
//! Format: Header (5 bytes) + postcard-serialized tracker.
//! - 4 bytes: Magic ("GRFT")
//! - 1 byte: Version
//!
//! Size and header are validated before the payload is decoded.

use crate::primitives::{FORMAT_VERSION, HEADER_LEN, MAGIC_BYTES, MAX_SNAPSHOT_SIZE};
use crate::tracker::IdentityTracker;
use crate::types::GraftError;

// =============================================================================
// FILE HEADER
// =============================================================================

/// The snapshot header precedes the tracker payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub magic: [u8; 4],
    pub version: u8,
}

impl SnapshotHeader {
    /// Create a header with the current format version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: *MAGIC_BYTES,
            version: FORMAT_VERSION,
        }
    }

    /// Validate magic and version.
    pub fn validate(&self) -> Result<(), GraftError> {
        if &self.magic != MAGIC_BYTES {
            return Err(GraftError::SerializationError(
                "Invalid magic bytes".to_string(),
            ));
        }
        if self.version != FORMAT_VERSION {
            return Err(GraftError::SerializationError(format!(
                "Unsupported snapshot version: {} (expected {})",
                self.version, FORMAT_VERSION
            )));
        }
        Ok(())
    }

    /// Write header to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4] = self.version;
        bytes
    }

    /// Read header from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, GraftError> {
        if bytes.len() < HEADER_LEN {
            return Err(GraftError::SerializationError(
                "Header too short".to_string(),
            ));
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        Ok(Self {
            magic,
            version: bytes[4],
        })
    }
}

impl Default for SnapshotHeader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// SERIALIZATION FUNCTIONS
// =============================================================================

/// Serialize a tracker to bytes (header + payload).
pub fn tracker_to_bytes(tracker: &IdentityTracker) -> Result<Vec<u8>, GraftError> {
    let payload = postcard::to_stdvec(tracker)
        .map_err(|e| GraftError::SerializationError(e.to_string()))?;

    let mut result = Vec::with_capacity(HEADER_LEN + payload.len());
    result.extend_from_slice(&SnapshotHeader::new().to_bytes());
    result.extend_from_slice(&payload);
    Ok(result)
}

/// Deserialize a tracker from bytes.
///
/// Rejects data shorter than the header or larger than `MAX_SNAPSHOT_SIZE`
/// before touching the payload. Persisted tracking keys are re-validated
/// while decoding.
pub fn tracker_from_bytes(bytes: &[u8]) -> Result<IdentityTracker, GraftError> {
    if bytes.len() < HEADER_LEN {
        return Err(GraftError::SerializationError(format!(
            "Data too short: minimum {} bytes required",
            HEADER_LEN
        )));
    }
    if bytes.len() > MAX_SNAPSHOT_SIZE {
        return Err(GraftError::SerializationError(format!(
            "Data size {} bytes exceeds maximum allowed {} bytes",
            bytes.len(),
            MAX_SNAPSHOT_SIZE
        )));
    }

    SnapshotHeader::from_bytes(bytes)?.validate()?;

    postcard::from_bytes(&bytes[HEADER_LEN..]).map_err(|e| {
        GraftError::SerializationError(format!("Failed to deserialize tracker: {}", e))
    })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::TrackingKey;
    use crate::tracker::{PendingEdgeRow, TrackedEdge, TrackedVertex, TrackerStore};
    use crate::types::{EngineId, PropertyMap};

    fn populated() -> IdentityTracker {
        let mut tracker = IdentityTracker::with_default_schemas().expect("tracker");
        let user = TrackingKey::vertex("user", "U-1").expect("key");
        let question = TrackingKey::vertex("question", "Q1").expect("key");
        let edge = TrackingKey::edge("uq", &user, &question).expect("edge");

        tracker
            .record_vertex(&user, TrackedVertex::properties(&EngineId::Long(1)), true)
            .expect("user");
        tracker
            .record_vertex(&question, TrackedVertex::properties(&EngineId::Text("q1".into())), true)
            .expect("question");
        tracker
            .record_edge(
                &edge,
                TrackedEdge::properties(&EngineId::Long(1), &EngineId::Text("q1".into()), "UserPostsQuestion"),
                true,
            )
            .expect("edge");

        let answer = TrackingKey::vertex("answer", "A1").expect("key");
        let pending = TrackingKey::edge("aq", &answer, &question).expect("edge");
        tracker
            .store_pending_edges(vec![(
                pending,
                PendingEdgeRow {
                    from: answer,
                    to: question,
                    label: "AnswerIsForQuestion".to_string(),
                    properties: PropertyMap::new(),
                },
            )])
            .expect("pending");
        tracker
    }

    #[test]
    fn header_layout() {
        let bytes = SnapshotHeader::new().to_bytes();
        assert_eq!(&bytes[0..4], MAGIC_BYTES);
        assert_eq!(bytes[4], FORMAT_VERSION);
    }

    #[test]
    fn restored_tracker_answers_lookups() {
        let tracker = populated();
        let restored = tracker_from_bytes(&tracker_to_bytes(&tracker).expect("encode"))
            .expect("decode");

        assert_eq!(restored, tracker);
        let user = TrackingKey::vertex("user", "U-1").expect("key");
        assert_eq!(
            restored.vertex_engine_id(&user).expect("id"),
            Some(EngineId::Long(1))
        );
        assert_eq!(restored.pending_edges().expect("pending").len(), 1);
    }

    #[test]
    fn older_version_rejected() {
        let mut bytes = tracker_to_bytes(&populated()).expect("encode");
        bytes[4] = 1;
        assert!(tracker_from_bytes(&bytes).is_err());
    }

    #[test]
    fn snapshot_is_deterministic() {
        let a = tracker_to_bytes(&populated()).expect("encode");
        let b = tracker_to_bytes(&populated()).expect("encode");
        assert_eq!(a, b);
    }

    #[test]
    fn invalid_magic_rejected() {
        let mut bytes = tracker_to_bytes(&populated()).expect("encode");
        bytes[0..4].copy_from_slice(b"KREM");
        assert!(tracker_from_bytes(&bytes).is_err());
    }

    #[test]
    fn truncated_data_rejected() {
        assert!(tracker_from_bytes(b"GRF").is_err());
        let bytes = tracker_to_bytes(&populated()).expect("encode");
        assert!(tracker_from_bytes(&bytes[..bytes.len() - 3]).is_err());
    }
}
