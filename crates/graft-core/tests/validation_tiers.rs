//! # Validation Tier Tests (T0-T4)
//!
//! End-to-end ingestion scenarios against the in-memory engine.
//!
//! ## Tiers
//! - T0: Schema Containment
//! - T1: Idempotent Upsert
//! - T2: Deferred Edges
//! - T3: Partial Failure Isolation
//! - T4: Resumable Tracking

use graft_core::client::Operation;
use graft_core::{
    Action, EdgeFlush, ElementSchema, EngineId, ErrorPolicy, ForwardRefs, GraftError,
    IdentityTracker, IngestRun, IngestTags, MemoryGraph, PropertyMap, PropertyType, PropertyValue,
    RecordMapper, RedbTracker, RemoteError, RetryPolicy, SchemaError, SourceRecord, StackOverflow,
    StagingTable, TrackerBackend, TrackerStore, TrackingKey, UpsertOptions, Upserter,
    edge_tracking_schema, tracker_from_bytes, tracker_to_bytes, vertex_tracking_schema,
};

fn upserter_with<T: TrackerStore>(
    tracker: T,
    options: UpsertOptions,
) -> Upserter<MemoryGraph, T> {
    Upserter::new(
        MemoryGraph::new(),
        tracker,
        StackOverflow.graph_model().expect("model"),
        None,
        options,
    )
    .expect("upserter")
}

fn upserter(options: UpsertOptions) -> Upserter<MemoryGraph, IdentityTracker> {
    upserter_with(IdentityTracker::with_default_schemas().expect("tracker"), options)
}

fn key(prefix: &str, id: &str) -> TrackingKey {
    TrackingKey::vertex(prefix, id).expect("key")
}

fn question(id: &str, owner: &str) -> SourceRecord {
    SourceRecord::new("question")
        .with("Id", id)
        .with("OwnerUserId", owner)
        .with("Title", "t")
        .with("Body", "b")
        .with("Score", 3_i64)
        .with("CreationDate", "2008-08-01T13:57:07Z")
}

fn answer(id: &str, parent: &str, owner: &str) -> SourceRecord {
    SourceRecord::new("answer")
        .with("Id", id)
        .with("ParentId", parent)
        .with("OwnerUserId", owner)
        .with("Body", "use a map")
        .with("Score", 5_i64)
        .with("CreationDate", "2008-08-01T14:00:00Z")
}

// =============================================================================
// TIER T0: SCHEMA CONTAINMENT
// =============================================================================

mod t0_schema_containment {
    use super::*;

    fn schema() -> ElementSchema {
        ElementSchema::new(
            "Question",
            [("QuestionTitle", PropertyType::Text), ("PostScore", PropertyType::Int)],
        )
        .expect("schema")
    }

    /// T0.1: Staging accepts any subset of the declared properties.
    #[test]
    fn subset_accepted() {
        let mut table = StagingTable::new(schema());
        let props = PropertyMap::from([("PostScore".to_string(), PropertyValue::Int(1))]);
        table.stage(key("question", "Q1"), props, true).expect("stage");
        assert!(table.exists(&key("question", "Q1")));
    }

    /// T0.2: Staging rejects undeclared properties and stores nothing.
    #[test]
    fn unknown_rejected() {
        let mut table = StagingTable::new(schema());
        let props = PropertyMap::from([("Color".to_string(), PropertyValue::from("red"))]);
        let result = table.stage(key("question", "Q1"), props, true);
        assert!(matches!(
            result,
            Err(GraftError::Schema(SchemaError::UnknownProperty { .. }))
        ));
        assert!(table.is_empty());
    }

    /// T0.3: Exact mode rejects omissions.
    #[test]
    fn exact_mode_rejects_omission() {
        let result = schema().validate(["QuestionTitle"], true);
        assert!(matches!(result, Err(SchemaError::MissingProperty { ref name, .. }) if name == "PostScore"));
        assert!(schema().validate(["QuestionTitle", "PostScore"], true).is_ok());
    }

    /// T0.4: The tracker validates its rows exactly.
    #[test]
    fn tracker_rows_exact() {
        let mut tracker = IdentityTracker::with_default_schemas().expect("tracker");
        let result = tracker.record_vertex(&key("user", "U1"), PropertyMap::new(), true);
        assert!(result.is_err());
        assert_eq!(tracker.vertex_count().expect("count"), 0);
    }

    /// T0.5: Disabling the check lets a row through unvalidated.
    #[test]
    fn unchecked_staging() {
        let mut table = StagingTable::new(schema());
        let props = PropertyMap::from([("Color".to_string(), PropertyValue::from("red"))]);
        table.stage(key("question", "Q1"), props, false).expect("stage");
        assert_eq!(table.len(), 1);
    }
}

// =============================================================================
// TIER T1: IDEMPOTENT UPSERT
// =============================================================================

mod t1_idempotent_upsert {
    use super::*;

    /// T1.1: The reference question scenario.
    #[test]
    fn question_scenario() {
        let mut up = upserter(UpsertOptions::default());
        up.ingest(&StackOverflow, &question("Q1", "U1"), 0).expect("first");

        let edge = TrackingKey::try_from("uq-user-U1-question-Q1".to_string()).expect("key");
        assert_eq!(
            TrackingKey::edge("uq", &key("user", "U1"), &key("question", "Q1")).expect("edge"),
            edge
        );
        assert!(up.tracker().vertex_exists(&key("user", "U1")).expect("exists"));
        assert!(up.tracker().vertex_exists(&key("question", "Q1")).expect("exists"));
        assert!(up.tracker().edge_exists(&edge).expect("exists"));
        assert_eq!(
            up.tracker().tracked_edge(&edge).expect("edge").map(|e| e.label),
            Some("UserPostsQuestion".to_string())
        );

        let counts = (
            up.tracker().vertex_count().expect("count"),
            up.tracker().edge_count().expect("count"),
        );

        let again = up.ingest(&StackOverflow, &question("Q1", "U1"), 1).expect("again");
        assert_eq!(
            counts,
            (
                up.tracker().vertex_count().expect("count"),
                up.tracker().edge_count().expect("count"),
            )
        );
        assert!(again.actions.contains(&Action::UpdatedVertex(key("question", "Q1"))));
        assert!(again.actions.contains(&Action::SkippedEdge(edge)));
        assert_eq!(up.client().vertex_count(), 2);
        assert_eq!(up.client().edge_count(), 1);
        assert_eq!(up.client().update_count(), 1);
    }

    /// T1.2: The tracked identifier never changes across updates.
    #[test]
    fn identifier_stable() {
        let mut up = upserter(UpsertOptions::default());
        up.ingest(&StackOverflow, &question("Q1", "U1"), 0).expect("first");
        let before = up.tracker().vertex_engine_id(&key("question", "Q1")).expect("id");
        for position in 1..5 {
            up.ingest(&StackOverflow, &question("Q1", "U1"), position).expect("again");
        }
        let after = up.tracker().vertex_engine_id(&key("question", "Q1")).expect("id");
        assert_eq!(before, after);
    }

    /// T1.3: Every written element carries the full tag set.
    #[test]
    fn tags_everywhere() {
        let tags = IngestTags::new("so", "https://so.example", "run-1", "https://run.example");
        let mut up = Upserter::new(
            MemoryGraph::new(),
            IdentityTracker::with_default_schemas().expect("tracker"),
            StackOverflow.graph_model().expect("model"),
            Some(tags),
            UpsertOptions::default(),
        )
        .expect("upserter");

        up.ingest(&StackOverflow, &answer("A1", "Q1", "U2"), 0).expect("answer");
        up.ingest(&StackOverflow, &question("Q1", "U1"), 1).expect("question");

        for label in ["User", "Question", "Answer"] {
            for (_, vertex) in up.client().vertices_labelled(label) {
                for tag in ["SourceDataTag", "SourceDataUrl", "SourceAnalysisTag", "SourceAnalysisUrl"] {
                    assert!(vertex.properties.contains_key(tag), "{label} lacks {tag}");
                }
            }
        }
        for edge in up.client().edges() {
            assert_eq!(edge.properties.get("SourceAnalysisTag"), Some(&PropertyValue::from("run-1")));
        }
    }
}

// =============================================================================
// TIER T2: DEFERRED EDGES
// =============================================================================

mod t2_deferred_edges {
    use super::*;

    /// T2.1: A placeholder question is later completed, never duplicated.
    #[test]
    fn placeholder_reconciled() {
        let mut up = upserter(UpsertOptions::default());
        up.ingest(&StackOverflow, &answer("A1", "Q1", "U2"), 0).expect("answer");
        up.ingest(&StackOverflow, &question("Q1", "U1"), 1).expect("question");

        assert_eq!(up.client().vertices_labelled("Question").count(), 1);
        let id = up
            .tracker()
            .vertex_engine_id(&key("question", "Q1"))
            .expect("id")
            .expect("tracked");
        let vertex = up.client().vertex(&id).expect("vertex");
        assert_eq!(vertex.properties.get("QuestionTitle"), Some(&PropertyValue::from("t")));
        assert_eq!(up.client().edge_count(), 3);
    }

    /// T2.2: Under Defer the edge waits for the question record.
    #[test]
    fn deferred_until_endpoint_exists() {
        let options = UpsertOptions {
            forward_refs: ForwardRefs::Defer,
            ..UpsertOptions::default()
        };
        let mut up = upserter(options);
        let aq = TrackingKey::edge("aq", &key("answer", "A1"), &key("question", "Q1")).expect("edge");

        let outcome = up.ingest(&StackOverflow, &answer("A1", "Q1", "U2"), 0).expect("answer");
        assert!(outcome.actions.contains(&Action::DeferredEdge(aq.clone())));
        assert!(!up.tracker().vertex_exists(&key("question", "Q1")).expect("exists"));

        let summary = IngestRun::new(&StackOverflow, ErrorPolicy::Abort)
            .run(&mut up, vec![Ok(question("Q1", "U1"))])
            .expect("run");

        assert_eq!(summary.edges_pending, 0);
        assert!(up.tracker().edge_exists(&aq).expect("exists"));
        assert_eq!(up.client().vertices_labelled("Question").count(), 1);
    }

    /// T2.3: Deferred flushing sends nothing until the flush.
    #[test]
    fn deferred_flush_batches() {
        let options = UpsertOptions {
            edge_flush: EdgeFlush::Deferred,
            ..UpsertOptions::default()
        };
        let mut up = upserter(options);
        for (i, id) in ["Q1", "Q2", "Q3"].into_iter().enumerate() {
            up.ingest(&StackOverflow, &question(id, "U1"), i).expect("question");
        }
        assert_eq!(up.client().edge_count(), 0);
        assert_eq!(up.pending_edge_count(), 3);

        let report = up.flush_edges().expect("flush");
        assert_eq!(report.created.len(), 3);
        assert_eq!(up.client().edge_count(), 3);
        assert_eq!(up.tracker().edge_count().expect("count"), 3);
    }

    /// T2.4: An edge never leaves an endpoint vertex duplicated.
    #[test]
    fn endpoint_not_duplicated() {
        let mut up = upserter(UpsertOptions::default());
        up.ingest(&StackOverflow, &answer("A1", "Q1", "U2"), 0).expect("a1");
        up.ingest(&StackOverflow, &answer("A2", "Q1", "U2"), 1).expect("a2");
        assert_eq!(up.client().vertices_labelled("Question").count(), 1);
        assert_eq!(up.client().vertices_labelled("User").count(), 1);
        assert_eq!(up.client().edge_count(), 4);
    }
}

// =============================================================================
// TIER T3: PARTIAL FAILURE ISOLATION
// =============================================================================

mod t3_partial_failure {
    use super::*;

    /// T3.1: A failed edge leaves both vertices tracked and the edge absent.
    #[test]
    fn failed_edge_isolated() {
        let mut up = upserter(UpsertOptions::default());
        up.client_mut().fail_label(
            Operation::CreateEdge,
            "UserPostsQuestion",
            RemoteError::Rejected("constraint".into()),
            1,
        );

        let failure = up.ingest(&StackOverflow, &question("Q1", "U1"), 0).expect_err("edge");
        let edge = TrackingKey::edge("uq", &key("user", "U1"), &key("question", "Q1")).expect("edge");

        assert_eq!(failure.key, Some(edge.clone()));
        assert_eq!(failure.completed.len(), 2);
        assert!(up.tracker().vertex_exists(&key("user", "U1")).expect("exists"));
        assert!(up.tracker().vertex_exists(&key("question", "Q1")).expect("exists"));
        assert!(!up.tracker().edge_exists(&edge).expect("exists"));

        // Re-ingesting the record finishes the job without new vertices.
        up.ingest(&StackOverflow, &question("Q1", "U1"), 1).expect("retry record");
        assert!(up.tracker().edge_exists(&edge).expect("exists"));
        assert_eq!(up.client().vertex_count(), 2);
    }

    /// T3.2: Transient failures are retried with the tracker re-checked.
    #[test]
    fn transient_failure_retried() {
        let mut up = upserter(UpsertOptions::default());
        up.client_mut().fail(Operation::CreateVertex, RemoteError::Timeout, 1);
        up.client_mut().fail(
            Operation::CreateEdge,
            RemoteError::Engine { status: 503, message: "busy".into() },
            1,
        );

        up.ingest(&StackOverflow, &question("Q1", "U1"), 0).expect("retried");
        assert_eq!(up.client().vertex_count(), 2);
        assert_eq!(up.client().edge_count(), 1);
    }

    /// T3.3: Skip policy reports the failing record and carries on.
    #[test]
    fn skip_policy_reports() {
        let options = UpsertOptions {
            retry: RetryPolicy { max_attempts: 1 },
            ..UpsertOptions::default()
        };
        let mut up = upserter(options);
        up.client_mut().fail_label(Operation::CreateVertex, "Answer", RemoteError::Timeout, 1);

        let records = vec![
            Ok(question("Q1", "U1")),
            Ok(answer("A1", "Q1", "U2")),
            Ok(answer("A2", "Q1", "U2")),
        ];
        let summary = IngestRun::new(&StackOverflow, ErrorPolicy::Skip)
            .run(&mut up, records)
            .expect("run");

        assert_eq!(summary.records_ingested, 2);
        assert_eq!(summary.failures.len(), 1);
        let failure = &summary.failures[0];
        assert_eq!(failure.record.position, 1);
        assert_eq!(failure.key, Some(key("answer", "A1")));
        assert!(!up.tracker().vertex_exists(&key("answer", "A1")).expect("exists"));
        assert!(up.tracker().vertex_exists(&key("answer", "A2")).expect("exists"));
        assert_eq!(summary.edges_pending, 0);
    }
}

// =============================================================================
// TIER T4: RESUMABLE TRACKING
// =============================================================================

mod t4_resumable_tracking {
    use super::*;
    use tempfile::tempdir;

    /// T4.1: A redb tracker carries dedup state across runs.
    #[test]
    fn redb_resume() {
        let temp = tempdir().expect("temp dir");
        let path = temp.path().join("tracker.redb");
        let open = || {
            RedbTracker::open(
                &path,
                vertex_tracking_schema().expect("schema"),
                edge_tracking_schema().expect("schema"),
            )
            .expect("open")
        };

        let (first_graph, tracker) = {
            let mut up = upserter_with(TrackerBackend::from(open()), UpsertOptions::default());
            up.ingest(&StackOverflow, &question("Q1", "U1"), 0).expect("first run");
            up.into_parts()
        };
        drop(tracker);
        assert_eq!(first_graph.vertex_count(), 2);

        let mut up = Upserter::new(
            first_graph,
            TrackerBackend::from(open()),
            StackOverflow.graph_model().expect("model"),
            None,
            UpsertOptions::default(),
        )
        .expect("upserter");
        let outcome = up.ingest(&StackOverflow, &question("Q1", "U1"), 0).expect("second run");
        assert!(outcome.actions.contains(&Action::UpdatedVertex(key("question", "Q1"))));
        assert_eq!(up.client().vertex_count(), 2);
        assert_eq!(up.client().edge_count(), 1);
    }

    /// T4.2: A snapshot restores the in-memory tracker exactly.
    #[test]
    fn snapshot_resume() {
        let mut up = upserter(UpsertOptions::default());
        up.ingest(&StackOverflow, &question("Q1", "U1"), 0).expect("question");
        let (_, tracker) = up.into_parts();

        let restored = tracker_from_bytes(&tracker_to_bytes(&tracker).expect("encode"))
            .expect("decode");
        assert_eq!(restored, tracker);
        assert_eq!(
            restored.vertex_engine_id(&key("user", "U1")).expect("id"),
            Some(EngineId::Long(1))
        );
    }

    /// T4.3: An edge left pending by one run is created by the next run that
    /// tracks its missing endpoint, through a redb tracker.
    #[test]
    fn pending_edge_resumes_through_redb() {
        let temp = tempdir().expect("temp dir");
        let path = temp.path().join("tracker.redb");
        let open = || {
            TrackerBackend::from(
                RedbTracker::open(
                    &path,
                    vertex_tracking_schema().expect("schema"),
                    edge_tracking_schema().expect("schema"),
                )
                .expect("open"),
            )
        };
        let options = UpsertOptions {
            forward_refs: ForwardRefs::Defer,
            ..UpsertOptions::default()
        };
        let run = IngestRun::new(&StackOverflow, ErrorPolicy::Abort);
        let aq = TrackingKey::edge("aq", &key("answer", "A1"), &key("question", "Q9"))
            .expect("edge");

        let graph = {
            let mut up = upserter_with(open(), options);
            let summary = run
                .run(&mut up, vec![Ok(answer("A1", "Q9", "U2"))])
                .expect("first run");
            assert_eq!(summary.edges_pending, 1);
            let (graph, tracker) = up.into_parts();
            assert_eq!(tracker.pending_edges().expect("pending").len(), 1);
            graph
        };

        let mut up = Upserter::new(
            graph,
            open(),
            StackOverflow.graph_model().expect("model"),
            None,
            options,
        )
        .expect("upserter");
        assert_eq!(up.pending_edge_count(), 1);

        let summary = run
            .run(&mut up, vec![Ok(question("Q9", "U1"))])
            .expect("second run");
        assert_eq!(summary.edges_pending, 0);
        assert!(up.tracker().edge_exists(&aq).expect("exists"));
        assert!(up.tracker().pending_edges().expect("pending").is_empty());
        // ua, uq and aq
        assert_eq!(up.client().edge_count(), 3);
    }
}
