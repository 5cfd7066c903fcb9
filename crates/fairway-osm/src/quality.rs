//! Per-partition canonicalization with a reject tally.
//!
//! Runs [`normalize`] over a fetched partition, then assigns survivors to the
//! partition: entities outside the home country are dropped, and entities
//! without a state inherit the partition code.

use std::collections::BTreeMap;

use serde::Serialize;

use fairway_schemas::CanonicalEntity;

use crate::normalizer::{normalize, NormalizeContext};
use crate::provider::RawElement;

/// Reject counts keyed by reason (`not_target_facility`, `missing_name`,
/// `missing_coordinates`, `foreign_country`).
pub type RejectCounts = BTreeMap<&'static str, u64>;

pub const REASON_FOREIGN_COUNTRY: &str = "foreign_country";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NormalizeReport {
    pub partition: String,
    pub raw: u64,
    pub accepted: u64,
    pub rejected: RejectCounts,
}

impl NormalizeReport {
    pub fn rejected_total(&self) -> u64 {
        self.rejected.values().sum()
    }

    fn reject(&mut self, reason: &'static str) {
        *self.rejected.entry(reason).or_insert(0) += 1;
    }
}

pub fn canonicalize_partition(
    elements: &[RawElement],
    partition: &str,
    ctx: &NormalizeContext,
) -> (Vec<CanonicalEntity>, NormalizeReport) {
    let mut report = NormalizeReport {
        partition: partition.to_string(),
        raw: elements.len() as u64,
        ..NormalizeReport::default()
    };
    let mut out = Vec::with_capacity(elements.len());

    for el in elements {
        let mut entity = match normalize(el, ctx) {
            Ok(e) => e,
            Err(reason) => {
                report.reject(reason.as_str());
                continue;
            }
        };
        if entity.country != ctx.home_country {
            report.reject(REASON_FOREIGN_COUNTRY);
            continue;
        }
        if entity.state.is_none() {
            entity.state = Some(partition.to_string());
        }
        out.push(entity);
    }

    report.accepted = out.len() as u64;
    (out, report)
}
