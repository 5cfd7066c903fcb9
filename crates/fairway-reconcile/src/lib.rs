//! fairway-reconcile
//!
//! Reconciliation engine between canonical course entities and the document
//! store:
//! - [`identity`]: document key + content fingerprint.
//! - [`store`]: the document store collaborator trait and its typed ops.
//! - [`wire`]: typed ops/documents <-> loosely-typed JSON documents.
//! - [`engine`]: diff-and-batched-upsert ([`Reconciler`]).
//! - [`lifecycle`]: mark-unseen-stale and purge-expired-stale ([`StalenessManager`]).
//! - [`memory`]: in-process store used by tests and dry runs.
//!
//! Store-managed timestamps are written as "commit time" sentinels; only purge
//! needs a local clock, injected through [`Clock`].

pub mod clock;
pub mod engine;
pub mod identity;
pub mod lifecycle;
pub mod memory;
pub mod store;
pub mod wire;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{BatchFailure, ReconcileConfig, ReconcileError, ReconcileReport, Reconciler};
pub use identity::{document_key, fingerprint, slugify, MAX_KEY_LEN};
pub use lifecycle::{LifecycleReport, PartitionOutcome, StalenessManager};
pub use memory::MemoryStore;
pub use store::{DocumentFilter, DocumentStore, StoreError, StoredDocument, WriteOp};
