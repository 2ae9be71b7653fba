//! Integration tests for config file loading and merging.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use graft::config::{ConfigOverrides, FileConfig, Settings, TrackerKind};
use graft_core::{EdgeFlush, ErrorPolicy, ForwardRefs, GraftError, IngestTags};
use std::path::PathBuf;
use std::time::Duration;

const FULL_CONFIG: &str = r#"
[remote]
endpoint = "https://janus.internal:8182/gremlin"
traversal_source = "so"
timeout_secs = 5

[tags]
source_data_tag = "stackoverflow-2019"
source_data_url = "https://archive.org/details/stackexchange"
source_analysis_tag = "load-01"
source_analysis_url = "https://example.org/analysis/01"

[run]
error_policy = "skip"
retry_attempts = 4
edge_flush = "deferred"
forward_refs = "defer"

[tracker]
backend = "file"
path = "state/so.snap"
"#;

// =============================================================================
// FILE LOADING TESTS
// =============================================================================

#[test]
fn test_load_full_config_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graft.toml");
    std::fs::write(&path, FULL_CONFIG).unwrap();

    let file = FileConfig::load(&path).unwrap();
    let settings = Settings::resolve(file, &ConfigOverrides::default()).unwrap();

    assert_eq!(settings.endpoint, "https://janus.internal:8182/gremlin");
    assert_eq!(settings.traversal_source, "so");
    assert_eq!(settings.timeout, Duration::from_secs(5));
    assert_eq!(
        settings.tags,
        Some(IngestTags::new(
            "stackoverflow-2019",
            "https://archive.org/details/stackexchange",
            "load-01",
            "https://example.org/analysis/01",
        ))
    );
    assert_eq!(settings.error_policy, ErrorPolicy::Skip);
    assert_eq!(settings.options.retry.max_attempts, 4);
    assert_eq!(settings.options.edge_flush, EdgeFlush::Deferred);
    assert_eq!(settings.options.forward_refs, ForwardRefs::Defer);
    assert_eq!(settings.tracker, TrackerKind::File);
    assert_eq!(settings.tracker_path, PathBuf::from("state/so.snap"));
}

#[test]
fn test_explicit_missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");

    assert!(matches!(
        FileConfig::discover(Some(&missing)),
        Err(GraftError::IoError(_))
    ));
}

#[test]
fn test_invalid_policy_value_rejected() {
    let text = "[run]\nerror_policy = \"retry\"\n";
    assert!(matches!(
        FileConfig::parse(text),
        Err(GraftError::SerializationError(_))
    ));
}

// =============================================================================
// OVERRIDE TESTS
// =============================================================================

#[test]
fn test_cli_endpoint_and_backend_override_file() {
    let file = FileConfig::parse(FULL_CONFIG).unwrap();
    let overrides = ConfigOverrides {
        endpoint: Some("http://localhost:8182/gremlin".to_string()),
        tracker: Some(TrackerKind::Redb),
        error_policy: Some(ErrorPolicy::Abort),
        ..ConfigOverrides::default()
    };

    let settings = Settings::resolve(file, &overrides).unwrap();
    assert_eq!(settings.endpoint, "http://localhost:8182/gremlin");
    assert_eq!(settings.tracker, TrackerKind::Redb);
    assert_eq!(settings.error_policy, ErrorPolicy::Abort);
    // Untouched by the overrides
    assert_eq!(settings.tracker_path, PathBuf::from("state/so.snap"));
    assert_eq!(settings.options.edge_flush, EdgeFlush::Deferred);
}

#[test]
fn test_non_http_endpoint_rejected() {
    let overrides = ConfigOverrides {
        endpoint: Some("ws://localhost:8182/gremlin".to_string()),
        ..ConfigOverrides::default()
    };
    assert!(matches!(
        Settings::resolve(FileConfig::default(), &overrides),
        Err(GraftError::InvalidField { field, .. }) if field == "remote.endpoint"
    ));
}

#[test]
fn test_traversal_source_must_be_identifier() {
    let file = FileConfig::parse("[remote]\ntraversal_source = \"g; drop()\"\n").unwrap();
    assert!(Settings::resolve(file, &ConfigOverrides::default()).is_err());
}

// =============================================================================
// RENDERING TESTS
// =============================================================================

#[test]
fn test_rendered_settings_load_back_identically() {
    let file = FileConfig::parse(FULL_CONFIG).unwrap();
    let settings = Settings::resolve(file, &ConfigOverrides::default()).unwrap();

    let rendered = settings.to_file_config().to_toml().unwrap();
    let reparsed = Settings::resolve(
        FileConfig::parse(&rendered).unwrap(),
        &ConfigOverrides::default(),
    )
    .unwrap();

    assert_eq!(reparsed, settings);
}
