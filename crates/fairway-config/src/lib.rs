//! fairway-config
//!
//! Layered YAML configuration for the course loader.
//!
//! - [`layers`]: merge YAML documents in order, refuse literal secrets, and
//!   hash the canonical JSON so a run can record which configuration it used.
//! - [`unused`]: per-mode report of keys the loader never reads.
//! - [`loader`]: the typed [`LoaderConfig`] handed to constructors. Nothing in
//!   the core reads the process environment on its own.

pub mod layers;
pub mod loader;
pub mod secrets;
pub mod unused;

pub use layers::{load_layered_yaml, load_layered_yaml_from_strings, LoadedConfig};
pub use loader::{FetchSettings, LoaderConfig, ReconcileSettings, RetrySettings, RunSettings, StoreSettings};
pub use secrets::{resolve_secrets, ResolvedSecrets};
pub use unused::{consumed_pointers_for_mode, report_unused_keys, UnusedKeyPolicy, UnusedKeyReport};

/// What the current command is about to do. Decides which config subtrees
/// count as read and which secrets are required.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigMode {
    /// Fetch + canonicalize only; the store is never touched.
    DryRun,
    /// Full reconcile against the document store.
    Sync,
}

impl ConfigMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigMode::DryRun => "DRY_RUN",
            ConfigMode::Sync => "SYNC",
        }
    }
}

/// Visit every scalar leaf of `v` with its path segments. Arrays contribute
/// their index as a segment.
pub(crate) fn for_each_leaf<'a>(
    v: &'a serde_json::Value,
    path: &mut Vec<String>,
    visit: &mut dyn FnMut(&[String], &'a serde_json::Value),
) {
    use serde_json::Value;
    match v {
        Value::Object(map) => {
            for (k, child) in map {
                path.push(k.clone());
                for_each_leaf(child, path, visit);
                path.pop();
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                path.push(i.to_string());
                for_each_leaf(child, path, visit);
                path.pop();
            }
        }
        leaf => visit(path, leaf),
    }
}

/// RFC 6901 pointer for a segment path; the root is `/`.
pub(crate) fn pointer(path: &[String]) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    path.iter()
        .map(|seg| format!("/{}", seg.replace('~', "~0").replace('/', "~1")))
        .collect()
}
