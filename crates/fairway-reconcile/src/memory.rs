//! In-process [`DocumentStore`] over JSON documents.
//!
//! Same wire mapping as the persistent backend; commit-time sentinels resolve
//! against an injected [`Clock`]. Failures can be injected per commit number
//! or per streamed partition so tests can exercise partial-failure paths.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::stream::{self, BoxStream, StreamExt};
use serde_json::{Map, Value};

use crate::clock::{Clock, SystemClock};
use crate::store::{DocumentFilter, DocumentStore, StoreError, StoredDocument, WriteOp};
use crate::wire::{
    decode_document, encode_filter, encode_write, format_timestamp, matches_filter, WireWrite,
    F_STATE,
};

type Documents = BTreeMap<String, Map<String, Value>>;

#[derive(Default)]
struct Faults {
    /// 1-based commit numbers that fail.
    fail_commits: HashSet<usize>,
    fail_reads: bool,
    /// Streams whose filter names one of these states fail on the first item.
    fail_stream_states: HashSet<String>,
}

pub struct MemoryStore {
    docs: Mutex<Documents>,
    clock: Arc<dyn Clock>,
    commits: Mutex<usize>,
    faults: Mutex<Faults>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            docs: Mutex::new(BTreeMap::new()),
            clock,
            commits: Mutex::new(0),
            faults: Mutex::new(Faults::default()),
        }
    }

    /// Insert or replace a raw document, bypassing the wire mapping.
    pub fn insert_raw(&self, key: impl Into<String>, doc: Map<String, Value>) {
        lock(&self.docs).insert(key.into(), doc);
    }

    pub fn raw(&self, key: &str) -> Option<Map<String, Value>> {
        lock(&self.docs).get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        lock(&self.docs).keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.docs).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Commit attempts so far, failed ones included.
    pub fn commit_count(&self) -> usize {
        *lock(&self.commits)
    }

    pub fn fail_commit(&self, nth: usize) {
        lock(&self.faults).fail_commits.insert(nth);
    }

    pub fn fail_reads(&self, on: bool) {
        lock(&self.faults).fail_reads = on;
    }

    pub fn fail_stream_for_state(&self, state: impl Into<String>) {
        lock(&self.faults).fail_stream_states.insert(state.into());
    }

    fn apply(docs: &mut Documents, write: WireWrite, now: &str) {
        match write {
            WireWrite::Merge { key, fields } => {
                let doc = docs.entry(key).or_default();
                doc.extend(fields.set);
                for name in fields.server_now {
                    doc.insert(name.to_string(), Value::from(now));
                }
                for name in fields.remove {
                    doc.remove(name);
                }
            }
            WireWrite::Delete { key } => {
                docs.remove(&key);
            }
        }
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryStore {
    async fn get_many(&self, keys: &[String]) -> Result<BTreeMap<String, StoredDocument>, StoreError> {
        if lock(&self.faults).fail_reads {
            return Err(StoreError::Backend("injected read failure".to_string()));
        }
        let docs = lock(&self.docs);
        Ok(keys
            .iter()
            .filter_map(|k| docs.get(k).map(|d| (k.clone(), decode_document(k, d))))
            .collect())
    }

    async fn commit(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        let nth = {
            let mut c = lock(&self.commits);
            *c += 1;
            *c
        };
        if lock(&self.faults).fail_commits.contains(&nth) {
            return Err(StoreError::Backend(format!("injected commit failure #{nth}")));
        }

        let now = format_timestamp(self.clock.now());
        let mut docs = lock(&self.docs);
        for op in &ops {
            Self::apply(&mut docs, encode_write(op), &now);
        }
        Ok(())
    }

    fn stream_where<'a>(
        &'a self,
        filter: &DocumentFilter,
    ) -> BoxStream<'a, Result<StoredDocument, StoreError>> {
        let fail = filter
            .state
            .as_ref()
            .map(|s| lock(&self.faults).fail_stream_states.contains(s))
            .unwrap_or(false);
        if fail {
            let state = filter.state.clone().unwrap_or_default();
            return stream::iter(vec![Err(StoreError::Backend(format!(
                "injected stream failure {F_STATE}={state}"
            )))])
            .boxed();
        }

        let predicate = encode_filter(filter);
        let snapshot: Vec<Result<StoredDocument, StoreError>> = lock(&self.docs)
            .iter()
            .filter(|(_, d)| matches_filter(d, &predicate))
            .map(|(k, d)| Ok(decode_document(k, d)))
            .collect();
        stream::iter(snapshot).boxed()
    }
}
