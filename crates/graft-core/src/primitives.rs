//! # Fixed Names and Limits
//!
//! Property names the core itself writes, plus the snapshot format constants.
//! These are compiled in and never configured at runtime.

// =============================================================================
// TRACKING PROPERTIES
// =============================================================================

/// Vertex tracking column holding the engine-assigned identifier.
pub const ENGINE_ID: &str = "EngineId";

/// Edge tracking column holding the source endpoint's engine identifier.
pub const FROM_ENGINE_ID: &str = "FromEngineId";

/// Edge tracking column holding the target endpoint's engine identifier.
pub const TO_ENGINE_ID: &str = "ToEngineId";

/// Label column, used both in tracking rows and on written elements.
pub const ELEMENT_LABEL: &str = "ElementLabel";

/// Set once, when an element is created.
pub const ELEMENT_CREATED_AT: &str = "ElementCreationDateTime";

/// Refreshed on every create and update.
pub const ELEMENT_UPDATED_AT: &str = "ElementUpdateDateTime";

// =============================================================================
// INGEST TAGS
// =============================================================================

pub const SOURCE_DATA_TAG: &str = "SourceDataTag";
pub const SOURCE_DATA_URL: &str = "SourceDataUrl";
pub const SOURCE_ANALYSIS_TAG: &str = "SourceAnalysisTag";
pub const SOURCE_ANALYSIS_URL: &str = "SourceAnalysisUrl";

/// The provenance properties every written element carries.
pub const INGEST_TAG_NAMES: [&str; 4] = [
    SOURCE_DATA_TAG,
    SOURCE_DATA_URL,
    SOURCE_ANALYSIS_TAG,
    SOURCE_ANALYSIS_URL,
];

// =============================================================================
// SNAPSHOT FORMAT
// =============================================================================

/// Magic bytes for the tracker snapshot header.
pub const MAGIC_BYTES: &[u8; 4] = b"GRFT";

/// Current snapshot format version.
///
/// Increment this when making breaking changes to the snapshot layout.
pub const FORMAT_VERSION: u8 = 2;

/// Header length: magic plus version byte.
pub const HEADER_LEN: usize = 5;

/// Upper bound on a snapshot accepted for decoding (256 MB).
///
/// Checked before any allocation driven by the payload.
pub const MAX_SNAPSHOT_SIZE: usize = 256 * 1024 * 1024;
