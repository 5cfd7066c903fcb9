use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use fairway_osm::{FetchError, NormalizeContext, PartitionFetcher, RawElement};
use fairway_reconcile::{MemoryStore, ReconcileConfig, Reconciler, StalenessManager, SystemClock};
use fairway_runtime::*;

/// Serves a fixed response per partition and counts calls.
#[derive(Default)]
struct FixtureFetcher {
    responses: Mutex<HashMap<String, Result<Vec<RawElement>, FetchError>>>,
    calls: Mutex<Vec<String>>,
}

impl FixtureFetcher {
    fn set(&self, partition: &str, r: Result<Vec<RawElement>, FetchError>) {
        self.responses.lock().unwrap().insert(partition.to_string(), r);
    }
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl PartitionFetcher for FixtureFetcher {
    fn source_name(&self) -> &'static str {
        "fixture"
    }
    async fn fetch_partition(&self, partition: &str) -> Result<Vec<RawElement>, FetchError> {
        self.calls.lock().unwrap().push(partition.to_string());
        self.responses
            .lock()
            .unwrap()
            .get(partition)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

fn course(id: i64, name: &str, city: &str) -> RawElement {
    RawElement::node(
        id,
        43.0,
        -77.0,
        &[("leisure", "golf_course"), ("name", name), ("addr:city", city)],
    )
}

fn opts(run_id: &str) -> RunOptions {
    RunOptions {
        run_id: run_id.to_string(),
        skip_unchanged: true,
        mark_stale: true,
        purge_stale_days: 0,
        concurrency: 2,
        normalize: NormalizeContext::new("osm:2026-10", "US"),
    }
}

fn pipeline(fetcher: Arc<FixtureFetcher>, store: Arc<MemoryStore>) -> Pipeline {
    Pipeline::new(
        fetcher,
        Reconciler::new(store.clone(), ReconcileConfig::default()),
        StalenessManager::new(store, Arc::new(SystemClock), "US", 400),
    )
}

fn partitions(codes: &[&str]) -> Vec<String> {
    codes.iter().map(|c| c.to_string()).collect()
}

#[tokio::test]
async fn scenario_fetch_failure_is_isolated_to_its_partition() {
    let fetcher = Arc::new(FixtureFetcher::default());
    fetcher.set("NY", Err(FetchError::Transient("503 after retries".into())));
    fetcher.set("PA", Ok(vec![course(1, "Oakmont", "Oakmont")]));
    let store = Arc::new(MemoryStore::default());

    let summary = pipeline(fetcher, store.clone())
        .run(&partitions(&["NY", "PA"]), &opts("R1"))
        .await;

    assert_eq!(summary.partitions[0].partition, "NY");
    assert_eq!(summary.partitions[0].status, PartitionStatus::Failed(Stage::Fetch));
    assert_eq!(summary.partitions[1].status, PartitionStatus::Completed);
    assert_eq!(summary.written(), 1);
    assert!(!summary.is_clean());
    assert_eq!(store.keys(), vec!["oakmont-oakmont-pa".to_string()]);
}

#[tokio::test]
async fn scenario_unchanged_documents_are_not_marked_stale() {
    let fetcher = Arc::new(FixtureFetcher::default());
    fetcher.set(
        "NY",
        Ok(vec![course(1, "Oak Hill", "Rochester"), course(2, "Bethpage Black", "Farmingdale")]),
    );
    let store = Arc::new(MemoryStore::default());
    let p = pipeline(fetcher.clone(), store.clone());

    let first = p.run(&partitions(&["NY"]), &opts("R1")).await;
    assert_eq!(first.written(), 2);

    // Second run: Bethpage disappears, Oak Hill is unchanged.
    fetcher.set("NY", Ok(vec![course(1, "Oak Hill", "Rochester")]));
    let second = p.run(&partitions(&["NY"]), &opts("R2")).await;
    assert!(second.is_clean());
    assert_eq!((second.written(), second.skipped()), (0, 1));
    assert_eq!(second.marked_stale(), 1);

    let oak = store.raw("oak-hill-rochester-ny").unwrap();
    assert_eq!(oak["stale"], serde_json::json!(false));
    let bethpage = store.raw("bethpage-black-farmingdale-ny").unwrap();
    assert_eq!(bethpage["stale"], serde_json::json!(true));
}

/// Fetched under PA but addressed in NY, so its key and scope are NY's.
fn border_course() -> RawElement {
    RawElement::node(
        7,
        41.99,
        -75.5,
        &[
            ("leisure", "golf_course"),
            ("name", "Border Links"),
            ("addr:city", "Hancock"),
            ("addr:state", "NY"),
        ],
    )
}

#[tokio::test]
async fn scenario_course_seen_in_another_partition_is_not_marked_stale() {
    let fetcher = Arc::new(FixtureFetcher::default());
    fetcher.set("PA", Ok(vec![border_course()]));
    fetcher.set("NY", Ok(Vec::new()));
    let store = Arc::new(MemoryStore::default());
    let p = pipeline(fetcher, store.clone());

    let first = p.run(&partitions(&["PA", "NY"]), &opts("R1")).await;
    assert_eq!(first.written(), 1);
    assert_eq!(store.keys(), vec!["border-links-hancock-ny".to_string()]);

    let mut sequential = opts("R2");
    sequential.concurrency = 1;
    let second = p.run(&partitions(&["PA", "NY"]), &sequential).await;
    assert!(second.is_clean());
    assert_eq!((second.skipped(), second.marked_stale()), (1, 0));
    assert_eq!(store.raw("border-links-hancock-ny").unwrap()["stale"], serde_json::json!(false));

    // NY listed first and swept alongside PA: still exempt.
    let third = p.run(&partitions(&["NY", "PA"]), &opts("R3")).await;
    assert_eq!((third.skipped(), third.marked_stale()), (1, 0));
    assert_eq!(store.raw("border-links-hancock-ny").unwrap()["stale"], serde_json::json!(false));
}

#[tokio::test]
async fn scenario_course_gone_from_every_partition_is_marked_stale() {
    let fetcher = Arc::new(FixtureFetcher::default());
    fetcher.set("PA", Ok(vec![border_course()]));
    let store = Arc::new(MemoryStore::default());
    let p = pipeline(fetcher.clone(), store.clone());
    p.run(&partitions(&["PA", "NY"]), &opts("R1")).await;

    fetcher.set("PA", Ok(Vec::new()));
    let second = p.run(&partitions(&["PA", "NY"]), &opts("R2")).await;
    assert_eq!(second.partitions[1].marked_stale, 1);
    assert_eq!(store.raw("border-links-hancock-ny").unwrap()["stale"], serde_json::json!(true));
}

#[tokio::test]
async fn scenario_reconcile_failure_skips_staleness_for_that_partition() {
    let fetcher = Arc::new(FixtureFetcher::default());
    fetcher.set("NY", Ok(vec![course(1, "Oak Hill", "Rochester")]));
    let store = Arc::new(MemoryStore::default());
    store.insert_raw(
        "old-course-ny",
        serde_json::json!({"country": "US", "state": "NY", "stale": false, "last_seen_run_id": "R0"})
            .as_object()
            .cloned()
            .unwrap(),
    );
    store.fail_commit(1);

    let summary = pipeline(fetcher, store.clone())
        .run(&partitions(&["NY"]), &opts("R1"))
        .await;

    assert_eq!(summary.partitions[0].status, PartitionStatus::Failed(Stage::Reconcile));
    assert_eq!(summary.marked_stale(), 0);
    assert_eq!(store.raw("old-course-ny").unwrap()["stale"], serde_json::json!(false));
}

#[tokio::test]
async fn scenario_cancelled_run_starts_no_partitions() {
    let fetcher = Arc::new(FixtureFetcher::default());
    let store = Arc::new(MemoryStore::default());
    let p = pipeline(fetcher.clone(), store);
    p.cancel_handle().store(true, Ordering::SeqCst);

    let summary = p.run(&partitions(&["NY", "PA", "OH"]), &opts("R1")).await;
    assert_eq!(summary.cancelled().count(), 3);
    assert!(fetcher.calls().is_empty());
}

#[tokio::test]
async fn scenario_preview_samples_without_writing() {
    let fetcher = FixtureFetcher::default();
    let many: Vec<_> = (0..12).map(|i| course(i, &format!("Course {i}"), "Town")).collect();
    fetcher.set("NY", Ok(many));
    fetcher.set("PA", Err(FetchError::Permanent("400".into())));

    let out = preview(
        &fetcher,
        &partitions(&["NY", "PA"]),
        &NormalizeContext::new("osm:2026-10", "US"),
    )
    .await;
    assert_eq!(out.total, 12);
    assert_eq!(out.sample.len(), 10);
    assert_eq!(out.fetch_failures.len(), 1);
    assert_eq!(out.sample[0].state.as_deref(), Some("NY"));
}
