use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use fairway_osm::{canonicalize_partition, NormalizeContext, NormalizeReport, PartitionFetcher};
use fairway_reconcile::{
    document_key, LifecycleReport, ReconcileError, ReconcileReport, Reconciler, StalenessManager,
};
use fairway_schemas::CanonicalEntity;

/// Entities shown by a dry run.
pub const PREVIEW_SAMPLE: usize = 10;

/// `run-YYYYmmddHHMMSS-xxxxxxxx`.
pub fn new_run_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("run-{}-{}", now.format("%Y%m%d%H%M%S"), &suffix[..8])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub run_id: String,
    pub skip_unchanged: bool,
    pub mark_stale: bool,
    /// `<= 0` disables purge.
    pub purge_stale_days: i64,
    /// Partitions in flight at once; 1 is sequential.
    pub concurrency: usize,
    pub normalize: NormalizeContext,
}

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Reconcile,
    MarkStale,
    Purge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "stage")]
pub enum PartitionStatus {
    Completed,
    Failed(Stage),
    /// Never started: the run was cancelled first.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionSummary {
    pub partition: String,
    pub status: PartitionStatus,
    pub normalize: Option<NormalizeReport>,
    pub reconcile: Option<ReconcileReport>,
    pub marked_stale: u64,
    pub purged: u64,
    pub errors: Vec<String>,
}

impl PartitionSummary {
    fn new(partition: &str) -> Self {
        Self {
            partition: partition.to_string(),
            status: PartitionStatus::Completed,
            normalize: None,
            reconcile: None,
            marked_stale: 0,
            purged: 0,
            errors: Vec::new(),
        }
    }

    fn fail(mut self, stage: Stage, error: String) -> Self {
        self.status = PartitionStatus::Failed(stage);
        self.errors.push(error);
        self
    }

    pub fn written(&self) -> u64 {
        self.reconcile.as_ref().map(|r| r.written).unwrap_or(0)
    }

    pub fn skipped(&self) -> u64 {
        self.reconcile.as_ref().map(|r| r.skipped).unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub partitions: Vec<PartitionSummary>,
}

impl RunSummary {
    pub fn written(&self) -> u64 {
        self.partitions.iter().map(PartitionSummary::written).sum()
    }

    pub fn skipped(&self) -> u64 {
        self.partitions.iter().map(PartitionSummary::skipped).sum()
    }

    pub fn marked_stale(&self) -> u64 {
        self.partitions.iter().map(|p| p.marked_stale).sum()
    }

    pub fn purged(&self) -> u64 {
        self.partitions.iter().map(|p| p.purged).sum()
    }

    pub fn failed(&self) -> impl Iterator<Item = &PartitionSummary> {
        self.partitions
            .iter()
            .filter(|p| matches!(p.status, PartitionStatus::Failed(_)))
    }

    pub fn cancelled(&self) -> impl Iterator<Item = &PartitionSummary> {
        self.partitions
            .iter()
            .filter(|p| p.status == PartitionStatus::Cancelled)
    }

    pub fn is_clean(&self) -> bool {
        self.partitions
            .iter()
            .all(|p| p.status == PartitionStatus::Completed)
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Pipeline {
    fetcher: Arc<dyn PartitionFetcher>,
    reconciler: Reconciler,
    lifecycle: StalenessManager,
    cancel: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(
        fetcher: Arc<dyn PartitionFetcher>,
        reconciler: Reconciler,
        lifecycle: StalenessManager,
    ) -> Self {
        Self {
            fetcher,
            reconciler,
            lifecycle,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set to stop starting new partitions. Partitions already fetching
    /// still reconcile and are swept.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Two phases. First every partition is fetched, canonicalized and
    /// reconciled. Then each partition that got that far is swept for
    /// staleness, exempting every key derived anywhere in the run: a course
    /// fetched under one partition may belong to another partition's scope.
    pub async fn run(&self, partitions: &[String], opts: &RunOptions) -> RunSummary {
        info!(
            run_id = %opts.run_id,
            partitions = partitions.len(),
            source = self.fetcher.source_name(),
            "run start"
        );
        let concurrency = opts.concurrency.max(1);

        let mut ingested: Vec<(usize, PartitionSummary, BTreeSet<String>)> =
            stream::iter(partitions.iter().enumerate())
                .map(|(i, p)| async move {
                    let (summary, keys) = self.ingest_partition(p, opts).await;
                    (i, summary, keys)
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;
        ingested.sort_by_key(|(i, _, _)| *i);

        let mut seen_keys = BTreeSet::new();
        let mut summaries = Vec::with_capacity(ingested.len());
        for (_, summary, keys) in ingested {
            seen_keys.extend(keys);
            summaries.push(summary);
        }

        let seen_keys = &seen_keys;
        let partitions: Vec<PartitionSummary> = stream::iter(summaries)
            .map(|summary| self.sweep_partition(summary, seen_keys, opts))
            .buffered(concurrency)
            .collect()
            .await;

        let summary = RunSummary {
            run_id: opts.run_id.clone(),
            partitions,
        };
        info!(
            run_id = %summary.run_id,
            written = summary.written(),
            skipped = summary.skipped(),
            marked_stale = summary.marked_stale(),
            purged = summary.purged(),
            failed = summary.failed().count(),
            "run done"
        );
        summary
    }

    /// Fetch -> canonicalize -> reconcile. Also returns the document keys of
    /// every canonical entity, whether or not its write succeeded.
    async fn ingest_partition(
        &self,
        partition: &str,
        opts: &RunOptions,
    ) -> (PartitionSummary, BTreeSet<String>) {
        let mut summary = PartitionSummary::new(partition);
        if self.cancel.load(Ordering::SeqCst) {
            summary.status = PartitionStatus::Cancelled;
            return (summary, BTreeSet::new());
        }

        let elements = match self.fetcher.fetch_partition(partition).await {
            Ok(els) => els,
            Err(e) => {
                warn!(partition, error = %e, "fetch failed; skipping partition");
                return (summary.fail(Stage::Fetch, e.to_string()), BTreeSet::new());
            }
        };

        let (entities, normalized) = canonicalize_partition(&elements, partition, &opts.normalize);
        info!(
            partition,
            raw = normalized.raw,
            accepted = normalized.accepted,
            rejected = normalized.rejected_total(),
            "canonicalized"
        );
        summary.normalize = Some(normalized);

        let keys: BTreeSet<String> = entities
            .iter()
            .map(document_key)
            .filter(|k| !k.is_empty())
            .collect();

        match self
            .reconciler
            .reconcile(&entities, &opts.run_id, opts.skip_unchanged)
            .await
        {
            Ok(reconciled) => {
                info!(
                    partition,
                    written = reconciled.written,
                    skipped = reconciled.skipped,
                    "reconciled"
                );
                summary.reconcile = Some(reconciled);
                (summary, keys)
            }
            Err(e) => {
                warn!(partition, error = %e, "reconcile failed; staleness skipped for partition");
                if let ReconcileError::Write { report, .. } = &e {
                    summary.reconcile = Some(report.clone());
                }
                (summary.fail(Stage::Reconcile, e.to_string()), keys)
            }
        }
    }

    /// Mark stale, then purge. Only for partitions whose ingest completed.
    async fn sweep_partition(
        &self,
        mut summary: PartitionSummary,
        seen_keys: &BTreeSet<String>,
        opts: &RunOptions,
    ) -> PartitionSummary {
        if summary.status != PartitionStatus::Completed {
            return summary;
        }
        let scope = [summary.partition.clone()];

        if opts.mark_stale {
            let r = self
                .lifecycle
                .mark_stale_unseen(&scope, &opts.run_id, seen_keys)
                .await;
            summary.marked_stale = r.total();
            if let Some(err) = first_error(&r) {
                return summary.fail(Stage::MarkStale, err);
            }
        }

        if opts.purge_stale_days > 0 {
            let r = self.lifecycle.purge_stale(&scope, opts.purge_stale_days).await;
            summary.purged = r.total();
            if let Some(err) = first_error(&r) {
                return summary.fail(Stage::Purge, err);
            }
        }

        summary
    }
}

fn first_error(r: &LifecycleReport) -> Option<String> {
    r.failed().find_map(|p| p.error.clone())
}

// ---------------------------------------------------------------------------
// Dry run
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Preview {
    /// First [`PREVIEW_SAMPLE`] entities across all partitions, in order.
    pub sample: Vec<CanonicalEntity>,
    pub total: u64,
    pub partitions: Vec<NormalizeReport>,
    /// `(partition, error)` for partitions whose fetch failed.
    pub fetch_failures: Vec<(String, String)>,
}

/// Fetch and canonicalize without touching the store.
pub async fn preview(
    fetcher: &dyn PartitionFetcher,
    partitions: &[String],
    ctx: &NormalizeContext,
) -> Preview {
    let mut out = Preview::default();
    for partition in partitions {
        match fetcher.fetch_partition(partition).await {
            Ok(elements) => {
                let (entities, report) = canonicalize_partition(&elements, partition, ctx);
                out.total += entities.len() as u64;
                let room = PREVIEW_SAMPLE.saturating_sub(out.sample.len());
                out.sample.extend(entities.into_iter().take(room));
                out.partitions.push(report);
            }
            Err(e) => {
                warn!(partition = %partition, error = %e, "fetch failed; skipping partition");
                out.fetch_failures.push((partition.clone(), e.to_string()));
            }
        }
    }
    out
}
