//! Document store collaborator.
//!
//! The engine speaks only in typed ops and typed documents. Each backend maps
//! them to its own loosely-typed representation through [`crate::wire`].

use std::collections::BTreeMap;
use std::fmt;

use futures_util::stream::BoxStream;

use fairway_schemas::{CanonicalEntity, StoreMeta, TimestampValue};

// ---------------------------------------------------------------------------
// Documents and ops
// ---------------------------------------------------------------------------

/// A stored document as the engine sees it: its key and store-managed fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    pub key: String,
    pub meta: StoreMeta,
}

/// One write inside an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Merge all canonical fields and mark the document seen and active.
    /// `updated_at` and `source_updated_at` become commit time; `stale_at`
    /// is removed.
    Upsert {
        key: String,
        entity: CanonicalEntity,
        fingerprint: String,
        run_id: String,
    },
    /// Merge `stale = true` and `stale_at`.
    MarkStale { key: String, stale_at: TimestampValue },
    Delete { key: String },
}

impl WriteOp {
    pub fn key(&self) -> &str {
        match self {
            WriteOp::Upsert { key, .. } | WriteOp::MarkStale { key, .. } | WriteOp::Delete { key } => {
                key
            }
        }
    }
}

/// Equality predicates for [`DocumentStore::stream_where`]. `None` means
/// "don't care".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentFilter {
    pub country: Option<String>,
    pub state: Option<String>,
    pub stale: Option<bool>,
}

impl DocumentFilter {
    /// Every document belonging to one partition.
    pub fn partition(country: &str, state: &str) -> Self {
        Self {
            country: Some(country.to_string()),
            state: Some(state.to_string()),
            stale: None,
        }
    }

    pub fn stale_only(mut self) -> Self {
        self.stale = Some(true);
        self
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend failed or refused the call. Nothing in a failed commit
    /// was applied.
    Backend(String),
    /// A stored document could not be decoded.
    Decode { key: String, message: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Backend(msg) => write!(f, "store backend error: {msg}"),
            StoreError::Decode { key, message } => {
                write!(f, "store decode error key={key}: {message}")
            }
        }
    }
}

impl std::error::Error for StoreError {}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Keyed document store with batched get, atomic batched write, and
/// streaming equality query.
///
/// Implementations must be safe to share across partition workers.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Documents present for `keys`. Absent keys are simply missing from the
    /// map. Callers chunk `keys`; implementations need not.
    async fn get_many(&self, keys: &[String]) -> Result<BTreeMap<String, StoredDocument>, StoreError>;

    /// Apply `ops` all-or-nothing.
    async fn commit(&self, ops: Vec<WriteOp>) -> Result<(), StoreError>;

    /// Lazily stream documents matching `filter`. Restartable per call.
    fn stream_where<'a>(
        &'a self,
        filter: &DocumentFilter,
    ) -> BoxStream<'a, Result<StoredDocument, StoreError>>;
}
