//! fairway-runtime
//!
//! Per-partition orchestration of one loader run:
//! fetch (with retry) -> canonicalize -> reconcile -> mark stale -> purge.
//!
//! Partitions are independent. A failure in one is recorded in its
//! [`PartitionSummary`] and the run moves on. Within a partition the steps
//! are strictly ordered and a failed step skips the rest.
//!
//! Staleness sweeps start only after every partition has reconciled, so a
//! document seen anywhere in the run is never marked stale by it.

pub mod pipeline;

pub use pipeline::{
    new_run_id, preview, PartitionStatus, PartitionSummary, Pipeline, Preview, RunOptions,
    RunSummary, Stage,
};

use std::time::Duration;

use fairway_config::{ReconcileSettings, RetrySettings};
use fairway_osm::RetryPolicy;
use fairway_reconcile::ReconcileConfig;

pub fn retry_policy(s: &RetrySettings) -> RetryPolicy {
    RetryPolicy::new(
        s.max_attempts,
        Duration::from_millis(s.base_delay_ms),
        s.multiplier,
        Duration::from_millis(s.max_delay_ms),
    )
}

pub fn reconcile_config(s: &ReconcileSettings) -> ReconcileConfig {
    ReconcileConfig::new(s.read_batch_size, s.write_batch_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_map_onto_engine_types() {
        let p = retry_policy(&RetrySettings::default());
        assert_eq!(p.max_attempts, 5);
        assert_eq!(p.base_delay, Duration::from_secs(1));
        assert_eq!(p.max_delay, Duration::from_secs(60));

        let c = reconcile_config(&ReconcileSettings::default());
        assert_eq!((c.read_batch_size, c.write_batch_size), (300, 400));
    }
}
