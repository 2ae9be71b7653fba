//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use graft::config::{Settings, TrackerKind};
use graft::gremlin::GremlinHttpClient;
use graft::reader::{InputSpec, JsonLinesReader};
use graft_core::{
    AbortCause, GraftError, GraphClient, IdentityTracker, IngestRun, MemoryGraph, RecordMapper,
    RedbTracker, RunAborted, RunSummary, SourceRecord, StackOverflow, TrackerBackend,
    TrackerStore, Upserter, edge_tracking_schema, primitives::MAX_SNAPSHOT_SIZE,
    tracker_from_bytes, tracker_to_bytes, vertex_tracking_schema,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

// =============================================================================
// FILE VALIDATION
// =============================================================================

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), GraftError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| GraftError::IoError(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(GraftError::SerializationError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Validate an input path.
///
/// Canonicalizes the path (resolving symlinks and "..") and ensures it names
/// an existing regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, GraftError> {
    let canonical = path.canonicalize().map_err(|e| {
        GraftError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(GraftError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

// =============================================================================
// INGEST COMMAND
// =============================================================================

/// Ingest record files in order, then persist tracking state.
///
/// The run itself is blocking and executes on the blocking pool. Ctrl+C sets
/// the stop flag; the record in flight completes and tracking state is saved.
pub async fn cmd_ingest(
    settings: &Settings,
    inputs: &[InputSpec],
    dry_run: bool,
    json_mode: bool,
    verbose: bool,
) -> Result<(), GraftError> {
    let mut sources = Vec::with_capacity(inputs.len());
    for input in inputs {
        sources.push((input.kind.clone(), validate_file_path(&input.path)?));
    }

    let tracker = if dry_run {
        TrackerBackend::from(IdentityTracker::with_default_schemas()?)
    } else {
        load_tracker(settings)?
    };

    tracing::info!(
        inputs = sources.len(),
        endpoint = if dry_run { "dry-run" } else { settings.endpoint.as_str() },
        tracker = settings.tracker.as_str(),
        "starting ingest"
    );

    let stop = Arc::new(AtomicBool::new(false));
    let interrupt = {
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, stopping after the current record");
                stop.store(true, Ordering::SeqCst);
            }
        })
    };

    let run_settings = settings.clone();
    let joined = tokio::task::spawn_blocking(move || {
        run_ingest(&run_settings, tracker, &sources, dry_run, stop)
    })
    .await;
    interrupt.abort();

    let (outcome, tracker) =
        joined.map_err(|e| GraftError::IoError(format!("Ingest task failed: {}", e)))??;

    if !dry_run {
        save_tracker(&tracker, settings)?;
    }

    match outcome {
        Ok(summary) => {
            print_summary(&summary, None, dry_run, json_mode, verbose);
            Ok(())
        }
        Err(RunAborted { summary, cause }) => {
            print_summary(&summary, Some(&cause), dry_run, json_mode, verbose);
            Err(match cause {
                AbortCause::Record(failure) => failure.source,
                AbortCause::Feed { source, .. } | AbortCause::Flush(source) => source,
            })
        }
    }
}

type IngestOutcome = (Result<RunSummary, RunAborted>, TrackerBackend);

fn run_ingest(
    settings: &Settings,
    tracker: TrackerBackend,
    sources: &[(String, PathBuf)],
    dry_run: bool,
    stop: Arc<AtomicBool>,
) -> Result<IngestOutcome, GraftError> {
    let mut readers = Vec::with_capacity(sources.len());
    for (kind, path) in sources {
        readers.push(JsonLinesReader::open(path, kind)?);
    }
    let feed = readers.into_iter().flatten();

    if dry_run {
        drive(MemoryGraph::new(), tracker, settings, feed, stop)
    } else {
        let client = GremlinHttpClient::new(
            &settings.endpoint,
            &settings.traversal_source,
            settings.timeout,
        )?;
        drive(client, tracker, settings, feed, stop)
    }
}

fn drive<C, I>(
    client: C,
    tracker: TrackerBackend,
    settings: &Settings,
    feed: I,
    stop: Arc<AtomicBool>,
) -> Result<IngestOutcome, GraftError>
where
    C: GraphClient,
    I: Iterator<Item = Result<SourceRecord, GraftError>>,
{
    let mapper = StackOverflow;
    let mut upserter = Upserter::new(
        client,
        tracker,
        mapper.graph_model()?,
        settings.tags.clone(),
        settings.options,
    )?;

    let outcome = IngestRun::new(&mapper, settings.error_policy)
        .with_stop(stop)
        .run(&mut upserter, feed);

    let (_, tracker) = upserter.into_parts();
    Ok((outcome, tracker))
}

fn print_summary(
    summary: &RunSummary,
    aborted: Option<&AbortCause>,
    dry_run: bool,
    json_mode: bool,
    verbose: bool,
) {
    if json_mode {
        let failures: Vec<_> = summary
            .failures
            .iter()
            .map(|f| {
                serde_json::json!({
                    "record": f.record.to_string(),
                    "key": f.key.as_ref().map(ToString::to_string),
                    "completed": f.completed.len(),
                    "error": f.source.to_string()
                })
            })
            .collect();
        let feed_errors: Vec<_> = summary
            .feed_errors
            .iter()
            .map(|(position, e)| {
                serde_json::json!({ "position": position, "error": e.to_string() })
            })
            .collect();
        let edge_failures: Vec<_> = summary
            .edge_failures
            .iter()
            .map(|(key, e)| serde_json::json!({ "key": key.to_string(), "error": e.to_string() }))
            .collect();

        let output = serde_json::json!({
            "dry_run": dry_run,
            "records_seen": summary.records_seen,
            "records_ingested": summary.records_ingested,
            "records_skipped": summary.records_skipped,
            "vertices_created": summary.vertices_created,
            "vertices_updated": summary.vertices_updated,
            "vertices_reused": summary.vertices_reused,
            "edges_created": summary.edges_created,
            "edges_pending": summary.edges_pending,
            "stopped": summary.stopped,
            "aborted": aborted.map(ToString::to_string),
            "failures": failures,
            "feed_errors": feed_errors,
            "edge_failures": edge_failures
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return;
    }

    println!("graft Ingest Summary{}", if dry_run { " (dry run)" } else { "" });
    println!("====================");
    println!(
        "Records:  {} seen, {} ingested, {} skipped",
        summary.records_seen, summary.records_ingested, summary.records_skipped
    );
    println!(
        "Vertices: {} created, {} updated, {} reused",
        summary.vertices_created, summary.vertices_updated, summary.vertices_reused
    );
    println!(
        "Edges:    {} created, {} pending",
        summary.edges_created, summary.edges_pending
    );
    if summary.edges_pending > 0 && !dry_run {
        println!("Pending edges are kept in the tracker for the next run.");
    }

    if summary.stopped {
        println!();
        println!("Stopped on request before the input was exhausted.");
    }
    if let Some(cause) = aborted {
        println!();
        println!("Aborted: {}", cause);
    }

    let problems =
        summary.failures.len() + summary.feed_errors.len() + summary.edge_failures.len();
    if problems > 0 && !verbose {
        println!();
        println!("{} problems; rerun with --verbose to list them", problems);
    } else if problems > 0 {
        println!();
        for failure in &summary.failures {
            println!("  {}", failure);
        }
        for (position, e) in &summary.feed_errors {
            println!("  record #{}: {}", position, e);
        }
        for (key, e) in &summary.edge_failures {
            println!("  edge {}: {}", key, e);
        }
    }
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show tracker status.
pub fn cmd_status(settings: &Settings, json_mode: bool) -> Result<(), GraftError> {
    let tracker = load_tracker(settings)?;
    let vertices = tracker.vertex_count()?;
    let edges = tracker.edge_count()?;
    let pending = tracker.pending_edges()?.len();

    if json_mode {
        let output = serde_json::json!({
            "tracker": settings.tracker_path.to_string_lossy(),
            "backend": settings.tracker.as_str(),
            "vertex_count": vertices,
            "edge_count": edges,
            "pending_edge_count": pending,
            "endpoint": settings.endpoint
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    println!("graft Tracker Status");
    println!("====================");
    println!("Tracker:  {:?}", settings.tracker_path);
    println!("Backend:  {}", settings.tracker.as_str());
    println!("Endpoint: {}", settings.endpoint);
    println!();
    println!("Tracked Vertices: {}", vertices);
    println!("Tracked Edges:    {}", edges);
    println!("Pending Edges:    {}", pending);

    Ok(())
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Initialize a new tracker store.
pub fn cmd_init(settings: &Settings, force: bool) -> Result<(), GraftError> {
    let path = &settings.tracker_path;

    if settings.tracker == TrackerKind::Memory {
        println!("Memory tracker selected; nothing to initialize");
        return Ok(());
    }

    if path.exists() {
        if !force {
            return Err(GraftError::SerializationError(
                "Tracker already exists. Use --force to overwrite.".to_string(),
            ));
        }
        std::fs::remove_file(path)
            .map_err(|e| GraftError::IoError(format!("Remove tracker: {}", e)))?;
    }

    match settings.tracker {
        TrackerKind::Redb => {
            let _tracker = open_redb(path)?;
            println!("Initialized new redb tracker at {:?}", path);
        }
        _ => {
            let tracker = TrackerBackend::from(IdentityTracker::with_default_schemas()?);
            save_tracker(&tracker, settings)?;
            println!("Initialized new file tracker at {:?}", path);
        }
    }

    Ok(())
}

// =============================================================================
// COMPACT COMMAND
// =============================================================================

/// Compact the redb tracker file.
pub fn cmd_compact(settings: &Settings) -> Result<(), GraftError> {
    if settings.tracker != TrackerKind::Redb {
        return Err(GraftError::SerializationError(format!(
            "Compaction applies to the redb backend, not '{}'",
            settings.tracker.as_str()
        )));
    }

    let before = file_len(&settings.tracker_path);
    let mut tracker = open_redb(&settings.tracker_path)?;
    tracker.compact()?;
    drop(tracker);
    let after = file_len(&settings.tracker_path);

    println!(
        "Compacted {:?}: {} -> {} bytes",
        settings.tracker_path, before, after
    );
    Ok(())
}

fn file_len(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

// =============================================================================
// CONFIG COMMAND
// =============================================================================

/// Print the effective configuration.
pub fn cmd_config(
    settings: &Settings,
    source: Option<&Path>,
    json_mode: bool,
) -> Result<(), GraftError> {
    let file = settings.to_file_config();

    if json_mode {
        let output = serde_json::json!({
            "source": source.map(|p| p.to_string_lossy().into_owned()),
            "config": file
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    match source {
        Some(path) => println!("# loaded from {}", path.display()),
        None => println!("# no config file found; built-in defaults"),
    }
    print!("{}", file.to_toml()?);
    Ok(())
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

fn open_redb(path: &Path) -> Result<RedbTracker, GraftError> {
    RedbTracker::open(path, vertex_tracking_schema()?, edge_tracking_schema()?)
}

/// Load or create the tracker the settings name.
pub fn load_tracker(settings: &Settings) -> Result<TrackerBackend, GraftError> {
    let path = &settings.tracker_path;
    match settings.tracker {
        TrackerKind::Redb => Ok(open_redb(path)?.into()),
        TrackerKind::File if path.exists() => {
            validate_file_size(path, MAX_SNAPSHOT_SIZE as u64)?;
            let data = std::fs::read(path)
                .map_err(|e| GraftError::IoError(format!("Read tracker: {}", e)))?;
            Ok(tracker_from_bytes(&data)?.into())
        }
        TrackerKind::File | TrackerKind::Memory => {
            Ok(IdentityTracker::with_default_schemas()?.into())
        }
    }
}

/// Persist tracking state for the file backend.
///
/// redb commits on every write and the memory backend keeps nothing, so only
/// the snapshot needs writing. The snapshot is replaced atomically.
pub fn save_tracker(tracker: &TrackerBackend, settings: &Settings) -> Result<(), GraftError> {
    if settings.tracker != TrackerKind::File || tracker.is_persistent() {
        return Ok(());
    }

    let memory = tracker.as_memory().ok_or_else(|| {
        GraftError::SerializationError("No tracker available for export".to_string())
    })?;
    let data = tracker_to_bytes(memory)?;

    let path = &settings.tracker_path;
    let mut staging = path.clone().into_os_string();
    staging.push(".tmp");
    std::fs::write(&staging, &data)
        .map_err(|e| GraftError::IoError(format!("Write tracker: {}", e)))?;
    std::fs::rename(&staging, path)
        .map_err(|e| GraftError::IoError(format!("Replace tracker: {}", e)))?;
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use graft_core::{EngineId, ForwardRefs, TrackedVertex, TrackingKey, UpsertOptions};

    const ANSWER: &str = r#"{"Id": 7, "OwnerUserId": 2, "CreationDate": "2008-08-01T14:45:37Z", "ParentId": 9, "Score": 1, "Body": "b"}"#;
    const QUESTION: &str = r#"{"Id": 9, "OwnerUserId": 1, "CreationDate": "2008-08-01T13:57:07Z", "Score": 3, "Title": "t", "Body": "b"}"#;

    fn file_settings(path: PathBuf) -> Settings {
        Settings {
            tracker: TrackerKind::File,
            tracker_path: path,
            ..Settings::default()
        }
    }

    #[test]
    fn file_tracker_survives_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let settings = file_settings(dir.path().join("tracker.snap"));

        let mut tracker = load_tracker(&settings).unwrap();
        assert_eq!(tracker.vertex_count().unwrap(), 0);

        let key = TrackingKey::vertex("user", "U1").unwrap();
        tracker
            .record_vertex(&key, TrackedVertex::properties(&EngineId::Long(4)), true)
            .unwrap();
        save_tracker(&tracker, &settings).unwrap();

        let reloaded = load_tracker(&settings).unwrap();
        assert_eq!(
            reloaded.vertex_engine_id(&key).unwrap(),
            Some(EngineId::Long(4))
        );
    }

    #[test]
    fn pending_edge_resolved_by_a_later_run() {
        for kind in [TrackerKind::File, TrackerKind::Redb] {
            let dir = tempfile::tempdir().unwrap();
            let settings = Settings {
                tracker: kind,
                tracker_path: dir.path().join("tracker"),
                options: UpsertOptions {
                    forward_refs: ForwardRefs::Defer,
                    ..UpsertOptions::default()
                },
                ..Settings::default()
            };
            let stop = Arc::new(AtomicBool::new(false));
            let mut graph = MemoryGraph::new();

            let answers = JsonLinesReader::new(ANSWER.as_bytes(), "answer", "answers");
            let (outcome, tracker) = drive(
                &mut graph,
                load_tracker(&settings).unwrap(),
                &settings,
                answers,
                Arc::clone(&stop),
            )
            .unwrap();
            assert_eq!(outcome.unwrap().edges_pending, 1);
            save_tracker(&tracker, &settings).unwrap();
            drop(tracker);

            let questions = JsonLinesReader::new(QUESTION.as_bytes(), "question", "questions");
            let (outcome, tracker) = drive(
                &mut graph,
                load_tracker(&settings).unwrap(),
                &settings,
                questions,
                Arc::clone(&stop),
            )
            .unwrap();
            let summary = outcome.unwrap();

            let aq = TrackingKey::edge(
                "aq",
                &TrackingKey::vertex("answer", "7").unwrap(),
                &TrackingKey::vertex("question", "9").unwrap(),
            )
            .unwrap();
            assert_eq!(summary.edges_pending, 0, "{}", kind.as_str());
            assert_eq!(summary.edges_created, 2, "{}", kind.as_str());
            assert!(tracker.edge_exists(&aq).unwrap());
            assert!(tracker.pending_edges().unwrap().is_empty());
        }
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let settings = file_settings(dir.path().join("tracker.snap"));

        cmd_init(&settings, false).unwrap();
        assert!(cmd_init(&settings, false).is_err());
        cmd_init(&settings, true).unwrap();
    }

    #[test]
    fn compact_requires_redb() {
        let dir = tempfile::tempdir().unwrap();
        assert!(cmd_compact(&file_settings(dir.path().join("t.snap"))).is_err());

        let redb = Settings {
            tracker: TrackerKind::Redb,
            tracker_path: dir.path().join("t.redb"),
            ..Settings::default()
        };
        cmd_compact(&redb).unwrap();
    }

    #[tokio::test]
    async fn dry_run_ingests_without_touching_the_tracker() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("questions.jsonl");
        std::fs::write(
            &input,
            concat!(
                r#"{"Id": 1, "OwnerUserId": 10, "CreationDate": "2008-08-01T13:57:07Z", "Score": 5, "Title": "t", "Body": "b"}"#,
                "\n",
                r#"{"Id": 2, "OwnerUserId": 10, "CreationDate": "2008-08-01 14:00:00", "Score": 0, "Title": "u", "Body": "c"}"#,
                "\n"
            ),
        )
        .unwrap();
        let settings = file_settings(dir.path().join("tracker.snap"));
        let inputs = vec![InputSpec {
            kind: "question".to_string(),
            path: input,
        }];

        cmd_ingest(&settings, &inputs, true, true, false).await.unwrap();
        assert!(!settings.tracker_path.exists());
    }

    #[tokio::test]
    async fn missing_input_is_rejected_before_running() {
        let dir = tempfile::tempdir().unwrap();
        let settings = file_settings(dir.path().join("tracker.snap"));
        let inputs = vec![InputSpec {
            kind: "question".to_string(),
            path: dir.path().join("absent.jsonl"),
        }];

        assert!(matches!(
            cmd_ingest(&settings, &inputs, true, true, false).await,
            Err(GraftError::IoError(_))
        ));
    }
}
