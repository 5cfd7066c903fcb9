//! Which config keys does this command actually read?
//!
//! Each [`ConfigMode`] names the subtrees the loader consumes. Any leaf
//! outside them is reported: a typo in an overlay otherwise silently falls
//! back to the default.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{for_each_leaf, pointer, ConfigMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnusedKeyPolicy {
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnusedKeyReport {
    pub mode: String,
    /// Consumed pointer prefixes for this mode (sorted)
    pub consumed_prefixes: Vec<String>,
    /// Unused leaf pointers (sorted)
    pub unused_leaf_pointers: Vec<String>,
}

impl UnusedKeyReport {
    pub fn is_clean(&self) -> bool {
        self.unused_leaf_pointers.is_empty()
    }
}

/// JSON-pointer prefixes read by [`crate::LoaderConfig`] in each mode.
///
/// A dry run never opens the store, so `/store` and the batch sizes are
/// reported as unused there.
pub fn consumed_pointers_for_mode(mode: ConfigMode) -> &'static [&'static str] {
    match mode {
        ConfigMode::DryRun => &[
            "/fetch",
            "/reconcile/home_country",
            "/reconcile/source_prefix",
            "/run",
        ],
        ConfigMode::Sync => &["/fetch", "/reconcile", "/run", "/store"],
    }
}

pub fn report_unused_keys(
    mode: ConfigMode,
    config_json: &Value,
    policy: UnusedKeyPolicy,
) -> Result<UnusedKeyReport> {
    let consumed: Vec<Vec<&str>> = consumed_pointers_for_mode(mode)
        .iter()
        .map(|p| p.split('/').filter(|s| !s.is_empty()).collect())
        .collect();

    let mut unused = Vec::new();
    for_each_leaf(config_json, &mut Vec::new(), &mut |path, _| {
        let covered = consumed.iter().any(|prefix| {
            prefix.len() <= path.len() && prefix.iter().zip(path).all(|(a, b)| *a == b.as_str())
        });
        if !covered {
            unused.push(pointer(path));
        }
    });
    unused.sort();
    unused.dedup();

    let mut consumed_prefixes: Vec<String> = consumed_pointers_for_mode(mode)
        .iter()
        .map(|p| p.to_string())
        .collect();
    consumed_prefixes.sort();

    let report = UnusedKeyReport {
        mode: mode.as_str().to_string(),
        consumed_prefixes,
        unused_leaf_pointers: unused,
    };

    if policy == UnusedKeyPolicy::Fail && !report.is_clean() {
        let first: Vec<&String> = report.unused_leaf_pointers.iter().take(12).collect();
        bail!(
            "CONFIG_UNUSED_KEYS (mode={}): {} key(s) not read by this command, e.g. {:?}",
            report.mode,
            report.unused_leaf_pointers.len(),
            first
        );
    }
    Ok(report)
}
