//! Diff-and-batched-upsert of canonical entities against the store.
//!
//! For one partition's entities:
//! 1. derive key + fingerprint; colliding keys: the later entity wins
//! 2. read existing documents in chunks of `read_batch_size`
//! 3. skip unchanged (same fingerprint, not stale) when asked to
//! 4. commit upserts in atomic chunks of `write_batch_size`
//!
//! A failed chunk does not stop the remaining chunks. It is returned to the
//! caller with its ops so it can be resubmitted; it is never counted as
//! written.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use fairway_schemas::CanonicalEntity;

use crate::identity::{document_key, fingerprint};
use crate::store::{DocumentStore, StoreError, StoredDocument, WriteOp};

/// Batch bounds imposed by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileConfig {
    pub read_batch_size: usize,
    pub write_batch_size: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            read_batch_size: 300,
            write_batch_size: 400,
        }
    }
}

impl ReconcileConfig {
    pub fn new(read_batch_size: usize, write_batch_size: usize) -> Self {
        Self {
            read_batch_size: read_batch_size.max(1),
            write_batch_size: write_batch_size.max(1),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub written: u64,
    pub skipped: u64,
    /// Entities whose derived key was empty. Never written.
    pub unkeyable: u64,
    /// Entities dropped because a later entity had the same key.
    pub collisions: u64,
    /// Entities with a NaN or infinite coordinate. Never written.
    pub invalid_coordinates: u64,
}

/// A chunk the store refused. Resubmit with [`Reconciler::resubmit`].
#[derive(Debug, Clone, PartialEq)]
pub struct BatchFailure {
    pub ops: Vec<WriteOp>,
    pub error: StoreError,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileError {
    /// Reading existing documents failed; nothing was written.
    Read(StoreError),
    /// Some chunks failed. `report.written` counts only committed chunks.
    Write {
        report: ReconcileReport,
        failures: Vec<BatchFailure>,
    },
}

impl ReconcileError {
    /// What was committed before/around the failure.
    pub fn partial_report(&self) -> Option<&ReconcileReport> {
        match self {
            ReconcileError::Read(_) => None,
            ReconcileError::Write { report, .. } => Some(report),
        }
    }
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileError::Read(e) => write!(f, "reconcile read failed: {e}"),
            ReconcileError::Write { report, failures } => {
                let failed_ops: usize = failures.iter().map(|b| b.ops.len()).sum();
                write!(
                    f,
                    "reconcile write failed: {} batch(es), {} op(s) not committed (written={})",
                    failures.len(),
                    failed_ops,
                    report.written
                )?;
                if let Some(first) = failures.first() {
                    write!(f, "; first error: {}", first.error)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ReconcileError {}

struct Prepared<'e> {
    key: String,
    fingerprint: String,
    entity: &'e CanonicalEntity,
}

pub struct Reconciler {
    store: Arc<dyn DocumentStore>,
    config: ReconcileConfig,
}

impl Reconciler {
    pub fn new(store: Arc<dyn DocumentStore>, config: ReconcileConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> ReconcileConfig {
        self.config
    }

    pub async fn reconcile(
        &self,
        entities: &[CanonicalEntity],
        run_id: &str,
        skip_unchanged: bool,
    ) -> Result<ReconcileReport, ReconcileError> {
        let mut report = ReconcileReport::default();
        let prepared = prepare(entities, &mut report);
        if prepared.is_empty() {
            return Ok(report);
        }

        let existing = if skip_unchanged {
            self.read_existing(&prepared).await.map_err(ReconcileError::Read)?
        } else {
            HashMap::new()
        };

        let mut ops = Vec::with_capacity(prepared.len());
        for p in prepared {
            let unchanged = existing.get(&p.key).is_some_and(|doc| {
                !doc.meta.stale && doc.meta.fingerprint.as_deref() == Some(p.fingerprint.as_str())
            });
            if unchanged {
                report.skipped += 1;
                continue;
            }
            ops.push(WriteOp::Upsert {
                key: p.key,
                entity: p.entity.clone(),
                fingerprint: p.fingerprint,
                run_id: run_id.to_string(),
            });
        }

        let (written, failures) = self.commit_chunks(ops).await;
        report.written = written;
        debug!(
            written = report.written,
            skipped = report.skipped,
            unkeyable = report.unkeyable,
            collisions = report.collisions,
            invalid_coordinates = report.invalid_coordinates,
            "reconcile done"
        );

        if failures.is_empty() {
            Ok(report)
        } else {
            Err(ReconcileError::Write { report, failures })
        }
    }

    /// Retry a refused chunk as-is. Returns the number of ops committed.
    pub async fn resubmit(&self, failure: BatchFailure) -> Result<u64, BatchFailure> {
        let n = failure.ops.len() as u64;
        match self.store.commit(failure.ops.clone()).await {
            Ok(()) => Ok(n),
            Err(error) => Err(BatchFailure {
                ops: failure.ops,
                error,
            }),
        }
    }

    async fn read_existing(
        &self,
        prepared: &[Prepared<'_>],
    ) -> Result<HashMap<String, StoredDocument>, StoreError> {
        let keys: Vec<String> = prepared.iter().map(|p| p.key.clone()).collect();
        let mut out = HashMap::with_capacity(keys.len());
        for chunk in keys.chunks(self.config.read_batch_size) {
            out.extend(self.store.get_many(chunk).await?);
        }
        Ok(out)
    }

    /// Commit `ops` in chunks; keep going past failures.
    async fn commit_chunks(&self, ops: Vec<WriteOp>) -> (u64, Vec<BatchFailure>) {
        commit_in_chunks(self.store.as_ref(), ops, self.config.write_batch_size).await
    }
}

/// Shared by the reconciler and the staleness lifecycle.
pub(crate) async fn commit_in_chunks(
    store: &dyn DocumentStore,
    ops: Vec<WriteOp>,
    chunk_size: usize,
) -> (u64, Vec<BatchFailure>) {
    let mut committed = 0u64;
    let mut failures = Vec::new();
    let mut iter = ops.into_iter().peekable();
    while iter.peek().is_some() {
        let chunk: Vec<WriteOp> = iter.by_ref().take(chunk_size.max(1)).collect();
        let n = chunk.len() as u64;
        match store.commit(chunk.clone()).await {
            Ok(()) => committed += n,
            Err(error) => {
                warn!(ops = n, %error, "batch commit failed; continuing with remaining batches");
                failures.push(BatchFailure { ops: chunk, error });
            }
        }
    }
    (committed, failures)
}

/// Key every entity. Later entities replace earlier ones with the same key
/// but keep the earlier position, so batching stays in first-seen order.
fn prepare<'e>(entities: &'e [CanonicalEntity], report: &mut ReconcileReport) -> Vec<Prepared<'e>> {
    let mut out: Vec<Prepared<'e>> = Vec::with_capacity(entities.len());
    let mut index: HashMap<String, usize> = HashMap::with_capacity(entities.len());

    for entity in entities {
        let key = document_key(entity);
        if key.is_empty() {
            report.unkeyable += 1;
            continue;
        }
        let Some(fp) = fingerprint(entity) else {
            warn!(key = %key, lat = entity.lat, lng = entity.lng, "non-finite coordinate; entity not written");
            report.invalid_coordinates += 1;
            continue;
        };
        let p = Prepared {
            fingerprint: fp,
            key: key.clone(),
            entity,
        };
        match index.get(&key) {
            Some(&i) => {
                // Last write wins within a run.
                debug!(key = %key, "document key collision; later entity replaces earlier");
                report.collisions += 1;
                out[i] = p;
            }
            None => {
                index.insert(key, out.len());
                out.push(p);
            }
        }
    }
    out
}
