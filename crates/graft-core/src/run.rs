//! # Ingestion Run Driver
//!
//! Feeds records in order to an `Upserter`, applies the error policy, honours
//! a stop flag between records and flushes pending edges at the end. Edges
//! left pending, whether the run finished or aborted, are saved with the
//! tracker for the next run.
//!
//! Records are processed strictly one after another. A stop request never
//! interrupts a record in flight.

use crate::client::GraphClient;
use crate::key::TrackingKey;
use crate::record::SourceRecord;
use crate::tracker::TrackerStore;
use crate::types::GraftError;
use crate::upsert::{RecordFailure, RecordMapper, UpsertStats, Upserter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{error, info, warn};

/// What a failed record does to the rest of the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorPolicy {
    /// Stop at the first failed record.
    #[default]
    Abort,
    /// Log the failure and continue with the next record.
    Skip,
}

/// Totals for one run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub records_seen: usize,
    pub records_ingested: usize,
    pub records_skipped: usize,
    pub vertices_created: usize,
    pub vertices_updated: usize,
    pub vertices_reused: usize,
    pub edges_created: usize,
    /// Edges still staged after the final flush, saved for the next run.
    pub edges_pending: usize,
    /// Records that failed and were skipped.
    pub failures: Vec<RecordFailure>,
    /// Feed entries that could not be read and were skipped.
    pub feed_errors: Vec<(usize, GraftError)>,
    /// Edges the final flush could not create.
    pub edge_failures: Vec<(TrackingKey, GraftError)>,
    /// The run ended on a stop request before the feed was exhausted.
    pub stopped: bool,
}

/// Why a run ended early.
#[derive(Debug, Error)]
pub enum AbortCause {
    #[error(transparent)]
    Record(#[from] RecordFailure),

    #[error("source feed failed at record #{position}: {source}")]
    Feed {
        position: usize,
        #[source]
        source: GraftError,
    },

    /// Flushing or saving pending edges failed.
    #[error("edge flush failed: {0}")]
    Flush(#[source] GraftError),
}

/// A run that ended early, with the totals reached so far.
#[derive(Debug, Error)]
#[error("run aborted after {} records: {cause}", .summary.records_seen)]
pub struct RunAborted {
    pub summary: RunSummary,
    #[source]
    pub cause: AbortCause,
}

/// Drives one pass over a record feed.
#[derive(Debug)]
pub struct IngestRun<'m, M> {
    mapper: &'m M,
    policy: ErrorPolicy,
    stop: Option<Arc<AtomicBool>>,
}

impl<'m, M: RecordMapper> IngestRun<'m, M> {
    pub fn new(mapper: &'m M, policy: ErrorPolicy) -> Self {
        Self {
            mapper,
            policy,
            stop: None,
        }
    }

    /// Check `flag` before every record and stop feeding once it is set.
    #[must_use]
    pub fn with_stop(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop = Some(flag);
        self
    }

    fn stop_requested(&self) -> bool {
        self.stop
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Ingest `records` in order, then flush pending edges.
    ///
    /// Unreadable feed entries follow the error policy too, except I/O
    /// failures, which always abort.
    pub fn run<C, T, I>(
        &self,
        upserter: &mut Upserter<C, T>,
        records: I,
    ) -> Result<RunSummary, RunAborted>
    where
        C: GraphClient,
        T: TrackerStore,
        I: IntoIterator<Item = Result<SourceRecord, GraftError>>,
    {
        let start = upserter.stats();
        let mut summary = RunSummary::default();

        for (position, next) in records.into_iter().enumerate() {
            if self.stop_requested() {
                info!(position, "stop requested, no further records fed");
                summary.stopped = true;
                break;
            }
            summary.records_seen += 1;

            let record = match next {
                Ok(record) => record,
                Err(source) => {
                    if self.policy == ErrorPolicy::Skip && !matches!(source, GraftError::IoError(_)) {
                        warn!(position, error = %source, "unreadable record skipped");
                        summary.records_skipped += 1;
                        summary.feed_errors.push((position, source));
                        continue;
                    }
                    error!(position, error = %source, "source feed failed");
                    return Err(abort(upserter, start, summary, AbortCause::Feed { position, source }));
                }
            };

            match upserter.ingest(self.mapper, &record, position) {
                Ok(_) => summary.records_ingested += 1,
                Err(failure) => match self.policy {
                    ErrorPolicy::Skip => {
                        warn!(error = %failure, completed = failure.completed.len(), "record skipped");
                        summary.records_skipped += 1;
                        summary.failures.push(failure);
                    }
                    ErrorPolicy::Abort => {
                        error!(error = %failure, "record failed, aborting run");
                        return Err(abort(upserter, start, summary, failure.into()));
                    }
                },
            }
        }

        let report = match upserter.flush_edges() {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "final edge flush failed");
                return Err(abort(upserter, start, summary, AbortCause::Flush(e)));
            }
        };
        summary.edge_failures = report.failed;
        if let Err(e) = upserter.save_pending_edges() {
            error!(error = %e, "saving pending edges failed");
            return Err(abort(upserter, start, summary, AbortCause::Flush(e)));
        }
        fill_totals(&mut summary, upserter, start);

        info!(
            records = summary.records_seen,
            ingested = summary.records_ingested,
            skipped = summary.records_skipped,
            vertices_created = summary.vertices_created,
            vertices_updated = summary.vertices_updated,
            edges_created = summary.edges_created,
            edges_pending = summary.edges_pending,
            "ingestion run finished"
        );
        Ok(summary)
    }
}

fn fill_totals<C: GraphClient, T: TrackerStore>(
    summary: &mut RunSummary,
    upserter: &Upserter<C, T>,
    start: UpsertStats,
) {
    let stats = upserter.stats().since(&start);
    summary.vertices_created = stats.vertices_created;
    summary.vertices_updated = stats.vertices_updated;
    summary.vertices_reused = stats.vertices_reused;
    summary.edges_created = stats.edges_created;
    summary.edges_pending = upserter.pending_edge_count();
}

fn abort<C: GraphClient, T: TrackerStore>(
    upserter: &mut Upserter<C, T>,
    start: UpsertStats,
    mut summary: RunSummary,
    cause: AbortCause,
) -> RunAborted {
    if let Err(e) = upserter.save_pending_edges() {
        error!(error = %e, "saving pending edges failed");
    }
    fill_totals(&mut summary, upserter, start);
    RunAborted { summary, cause }
}

// =============================================================================
// TESTS
// =============================================================================
