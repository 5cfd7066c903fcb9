//! Staleness lifecycle, scoped per partition:
//!
//! `ACTIVE --(unseen in a run)--> STALE --(retention elapsed)--> deleted`
//!
//! A reconcile write of the same key moves `STALE -> ACTIVE`. Each partition
//! is handled independently; a failure in one is reported and the next
//! partition still runs.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Duration;
use futures_util::StreamExt;
use serde::Serialize;
use tracing::{info, warn};

use fairway_schemas::{StaleAt, TimestampValue};

use crate::clock::Clock;
use crate::engine::commit_in_chunks;
use crate::store::{DocumentFilter, DocumentStore, StoredDocument, WriteOp};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PartitionOutcome {
    pub partition: String,
    /// Documents marked stale (or deleted) and committed.
    pub count: u64,
    /// Set when streaming or any commit failed for this partition.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LifecycleReport {
    pub partitions: Vec<PartitionOutcome>,
}

impl LifecycleReport {
    pub fn total(&self) -> u64 {
        self.partitions.iter().map(|p| p.count).sum()
    }

    pub fn failed(&self) -> impl Iterator<Item = &PartitionOutcome> {
        self.partitions.iter().filter(|p| p.error.is_some())
    }
}

pub struct StalenessManager {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    /// Country half of every partition scope.
    country: String,
    write_batch_size: usize,
}

impl StalenessManager {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        country: impl Into<String>,
        write_batch_size: usize,
    ) -> Self {
        Self {
            store,
            clock,
            country: country.into(),
            write_batch_size: write_batch_size.max(1),
        }
    }

    /// Mark every document in `partitions` whose last seen run is not
    /// `run_id` as stale. Already-stale documents get a fresh `stale_at`.
    pub async fn mark_stale(&self, partitions: &[String], run_id: &str) -> LifecycleReport {
        self.mark_stale_unseen(partitions, run_id, &BTreeSet::new()).await
    }

    /// As [`Self::mark_stale`], but documents whose key is in `seen_keys`
    /// are left alone even if this run skipped writing them.
    pub async fn mark_stale_unseen(
        &self,
        partitions: &[String],
        run_id: &str,
        seen_keys: &BTreeSet<String>,
    ) -> LifecycleReport {
        let mut report = LifecycleReport::default();
        for partition in partitions {
            let filter = DocumentFilter::partition(&self.country, partition);
            let outcome = self
                .sweep(partition, &filter, |doc| {
                    let seen = doc.meta.last_seen_run_id.as_deref() == Some(run_id)
                        || seen_keys.contains(&doc.key);
                    (!seen).then(|| WriteOp::MarkStale {
                        key: doc.key.clone(),
                        stale_at: TimestampValue::ServerNow,
                    })
                })
                .await;
            info!(partition = %partition, marked = outcome.count, "mark stale");
            report.partitions.push(outcome);
        }
        report
    }

    /// Delete stale documents in `partitions` whose `stale_at` is at or
    /// before `now - retention_days`. Missing or malformed `stale_at` is
    /// never purged. `retention_days <= 0` is a no-op.
    pub async fn purge_stale(&self, partitions: &[String], retention_days: i64) -> LifecycleReport {
        let mut report = LifecycleReport::default();
        if retention_days <= 0 {
            return report;
        }
        let cutoff = self.clock.now() - Duration::days(retention_days);

        for partition in partitions {
            let filter = DocumentFilter::partition(&self.country, partition).stale_only();
            let outcome = self
                .sweep(partition, &filter, |doc| {
                    if !doc.meta.stale {
                        return None;
                    }
                    match &doc.meta.stale_at {
                        StaleAt::At(ts) if *ts <= cutoff => Some(WriteOp::Delete {
                            key: doc.key.clone(),
                        }),
                        StaleAt::Malformed(raw) => {
                            warn!(key = %doc.key, stale_at = %raw, "malformed stale_at; keeping document");
                            None
                        }
                        _ => None,
                    }
                })
                .await;
            info!(partition = %partition, purged = outcome.count, retention_days, "purge stale");
            report.partitions.push(outcome);
        }
        report
    }

    /// Stream `filter`, turn matches into ops via `pick`, then commit them
    /// in `write_batch_size` chunks.
    async fn sweep<F>(&self, partition: &str, filter: &DocumentFilter, mut pick: F) -> PartitionOutcome
    where
        F: FnMut(&StoredDocument) -> Option<WriteOp>,
    {
        let mut outcome = PartitionOutcome {
            partition: partition.to_string(),
            ..PartitionOutcome::default()
        };
        let mut errors: Vec<String> = Vec::new();
        let mut pending: Vec<WriteOp> = Vec::new();

        // The stream is fully drained before the first commit.
        {
            let mut docs = self.store.stream_where(filter);
            while let Some(item) = docs.next().await {
                match item {
                    Ok(doc) => pending.extend(pick(&doc)),
                    Err(e) => {
                        errors.push(e.to_string());
                        break;
                    }
                }
            }
        }

        if errors.is_empty() {
            let (committed, failures) =
                commit_in_chunks(self.store.as_ref(), pending, self.write_batch_size).await;
            outcome.count = committed;
            errors.extend(failures.into_iter().map(|f| f.error.to_string()));
        }

        if !errors.is_empty() {
            warn!(partition = %partition, errors = errors.len(), "lifecycle sweep incomplete");
            outcome.error = Some(errors.join("; "));
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::memory::MemoryStore;
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};

    fn doc(v: Value) -> serde_json::Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    fn setup() -> (Arc<MemoryStore>, Arc<ManualClock>, StalenessManager) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap()));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let mgr = StalenessManager::new(store.clone(), clock.clone(), "US", 2);
        (store, clock, mgr)
    }

    #[tokio::test]
    async fn purge_respects_retention_window() {
        let (store, clock, mgr) = setup();
        let now = clock.now();
        let at = |days: i64| (now - Duration::days(days)).to_rfc3339();
        store.insert_raw("five", doc(json!({"country": "US", "state": "NY", "stale": true, "stale_at": at(5)})));
        store.insert_raw("fifteen", doc(json!({"country": "US", "state": "NY", "stale": true, "stale_at": at(15)})));
        store.insert_raw("exactly", doc(json!({"country": "US", "state": "NY", "stale": true, "stale_at": at(10)})));

        let nothing = mgr.purge_stale(&["NY".to_string()], 0).await;
        assert_eq!(nothing.total(), 0);
        assert_eq!(store.len(), 3);

        let r = mgr.purge_stale(&["NY".to_string()], 10).await;
        assert_eq!(r.total(), 2);
        assert_eq!(store.keys(), vec!["five".to_string()]);
    }

    #[tokio::test]
    async fn purge_never_touches_missing_or_malformed_stale_at() {
        let (store, _clock, mgr) = setup();
        store.insert_raw("missing", doc(json!({"country": "US", "state": "NY", "stale": true})));
        store.insert_raw("garbage", doc(json!({"country": "US", "state": "NY", "stale": true, "stale_at": "soon"})));

        let r = mgr.purge_stale(&["NY".to_string()], 1).await;
        assert_eq!(r.total(), 0);
        assert!(r.failed().next().is_none());
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn mark_stale_restamps_already_stale_documents() {
        let (store, clock, mgr) = setup();
        let old = (clock.now() - Duration::days(20)).to_rfc3339();
        store.insert_raw("gone", doc(json!({"country": "US", "state": "NY", "stale": true,
            "stale_at": old, "last_seen_run_id": "run-0"})));

        let r = mgr.mark_stale(&["NY".to_string()], "run-2").await;
        assert_eq!(r.total(), 1);
        let raw = store.raw("gone").unwrap();
        assert_eq!(raw["stale_at"], json!(clock.now().to_rfc3339()));
    }

    #[tokio::test]
    async fn mark_stale_honours_seen_keys_and_partition_scope() {
        let (store, _clock, mgr) = setup();
        for (key, state, run) in [("a", "NY", "run-1"), ("b", "NY", "run-0"), ("c", "NY", "run-0"), ("d", "PA", "run-0")] {
            store.insert_raw(key, doc(json!({"country": "US", "state": state, "stale": false, "last_seen_run_id": run})));
        }
        let seen: BTreeSet<String> = ["b".to_string()].into_iter().collect();

        let r = mgr.mark_stale_unseen(&["NY".to_string()], "run-1", &seen).await;
        assert_eq!(r.total(), 1);
        assert_eq!(store.raw("c").unwrap()["stale"], json!(true));
        assert_eq!(store.raw("b").unwrap()["stale"], json!(false));
        assert_eq!(store.raw("d").unwrap()["stale"], json!(false));
    }

    #[tokio::test]
    async fn one_partition_failing_does_not_stop_the_next() {
        let (store, _clock, mgr) = setup();
        store.insert_raw("ny", doc(json!({"country": "US", "state": "NY", "stale": false})));
        store.insert_raw("pa", doc(json!({"country": "US", "state": "PA", "stale": false})));
        store.fail_stream_for_state("NY");

        let r = mgr.mark_stale(&["NY".to_string(), "PA".to_string()], "run-1").await;
        assert_eq!(r.partitions.len(), 2);
        assert!(r.partitions[0].error.is_some());
        assert_eq!(r.partitions[1].count, 1);
        assert_eq!(store.raw("pa").unwrap()["stale"], json!(true));
    }
}
