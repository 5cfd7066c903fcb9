//! fairway-osm
//!
//! Source side of the course loader:
//! - [`provider`]: raw element shape, fetch error taxonomy, fetcher trait.
//! - [`overpass`]: the Overpass API fetcher (one query per partition).
//! - [`retry`]: bounded exponential-backoff wrapper for any fetcher.
//! - [`normalizer`]: raw element -> [`fairway_schemas::CanonicalEntity`] or rejection.
//! - [`quality`]: per-partition canonicalization with a reject report.
//!
//! It does **not** talk to the document store; callers hand canonical
//! entities to `fairway-reconcile`.

pub mod normalizer;
pub mod overpass;
pub mod provider;
pub mod quality;
pub mod retry;

pub use normalizer::{normalize, NormalizeContext, Rejection};
pub use overpass::OverpassProvider;
pub use provider::{FetchError, PartitionFetcher, RawElement};
pub use quality::{canonicalize_partition, NormalizeReport, RejectCounts};
pub use retry::{RetryPolicy, RetryingFetcher, Sleeper, TokioSleeper};

use chrono::{DateTime, Utc};

/// Partition keys: US state codes (ISO 3166-2 subdivision suffixes).
pub const US_STATES: [&str; 50] = [
    "AL", "AK", "AZ", "AR", "CA", "CO", "CT", "DE", "FL", "GA", //
    "HI", "ID", "IL", "IN", "IA", "KS", "KY", "LA", "ME", "MD", //
    "MA", "MI", "MN", "MS", "MO", "MT", "NE", "NV", "NH", "NJ", //
    "NM", "NY", "NC", "ND", "OH", "OK", "OR", "PA", "RI", "SC", //
    "SD", "TN", "TX", "UT", "VT", "VA", "WA", "WV", "WI", "WY",
];

/// Outcome of resolving user-supplied partition codes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionSelection {
    /// Uppercased, known, first-seen order, no duplicates.
    pub valid: Vec<String>,
    /// Codes as given that did not match a known partition.
    pub invalid: Vec<String>,
}

/// Resolve requested partitions. `all`, or an empty request, selects every
/// known partition.
pub fn resolve_partitions(requested: &[String], all: bool) -> PartitionSelection {
    if all || requested.is_empty() {
        return PartitionSelection {
            valid: US_STATES.iter().map(|s| s.to_string()).collect(),
            invalid: Vec::new(),
        };
    }

    let mut out = PartitionSelection::default();
    for raw in requested {
        let code = raw.trim().to_ascii_uppercase();
        if US_STATES.contains(&code.as_str()) {
            if !out.valid.contains(&code) {
                out.valid.push(code);
            }
        } else {
            out.invalid.push(raw.clone());
        }
    }
    out
}

/// Provenance tag carried on every entity of a run, e.g. `"osm:2026-10"`.
///
/// Computed once per run by the caller so canonicalization stays pure.
pub fn source_tag(prefix: &str, now: DateTime<Utc>) -> String {
    format!("{}:{}", prefix, now.format("%Y-%m"))
}
