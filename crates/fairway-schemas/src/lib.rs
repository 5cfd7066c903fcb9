//! fairway-schemas
//!
//! Shared shapes for the course loader:
//! - [`CanonicalEntity`]: the validated, reconciled unit of truth.
//! - [`StoreMeta`]: the store-managed fields the reconciler and the staleness
//!   lifecycle read back from a stored document.
//!
//! No IO here. Mapping to and from the loosely-typed wire form of the document
//! store lives at the store boundary (`fairway-reconcile::wire`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Country code assigned when a raw record carries no usable country.
pub const DEFAULT_HOME_COUNTRY: &str = "US";

/// Hole counts a course may declare. Anything else is discarded.
pub const ALLOWED_HOLE_COUNTS: [u32; 6] = [9, 18, 27, 36, 45, 54];

/// Upper bound on collected aliases per entity.
pub const MAX_ALIASES: usize = 10;

// ---------------------------------------------------------------------------
// Canonical entity
// ---------------------------------------------------------------------------

/// A canonicalized course.
///
/// `name_lower` is derived from `name` and only used for fingerprinting.
/// `external_id` and `source_tag` are provenance: they are written to the store
/// but never take part in the fingerprint or the document key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEntity {
    pub name: String,
    pub name_lower: String,
    /// Case-insensitively unique, first-seen order, at most [`MAX_ALIASES`].
    pub aliases: Vec<String>,
    pub city: Option<String>,
    /// Two-letter uppercase when the source value already had that shape.
    pub state: Option<String>,
    pub country: String,
    pub lat: f64,
    pub lng: f64,
    /// Always one of [`ALLOWED_HOLE_COUNTS`] when present.
    pub holes: Option<u32>,
    pub website: Option<String>,
    /// `"<type>:<id>"` of the source element.
    pub external_id: Option<String>,
    /// Provenance plus coarse recency, e.g. `"osm:2026-10"`.
    pub source_tag: String,
}

impl CanonicalEntity {
    /// Minimal entity in the home country. Mostly useful for tests and fixtures;
    /// production entities come out of the canonicalizer.
    pub fn new(name: impl Into<String>, lat: f64, lng: f64) -> Self {
        let name = name.into();
        Self {
            name_lower: name.to_lowercase(),
            name,
            aliases: Vec::new(),
            city: None,
            state: None,
            country: DEFAULT_HOME_COUNTRY.to_string(),
            lat,
            lng,
            holes: None,
            website: None,
            external_id: None,
            source_tag: String::new(),
        }
    }

    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_holes(mut self, holes: u32) -> Self {
        self.holes = Some(holes);
        self
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_source_tag(mut self, tag: impl Into<String>) -> Self {
        self.source_tag = tag.into();
        self
    }
}

// ---------------------------------------------------------------------------
// Store-managed metadata
// ---------------------------------------------------------------------------

/// Value for a timestamp field on write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampValue {
    /// Resolved by the store at commit time.
    ServerNow,
    At(DateTime<Utc>),
}

/// The `stale_at` field as found on a stored document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleAt {
    Absent,
    At(DateTime<Utc>),
    /// Present but not decodable as a timestamp. Never eligible for purge.
    Malformed(String),
}

impl StaleAt {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            StaleAt::At(ts) => Some(*ts),
            StaleAt::Absent | StaleAt::Malformed(_) => None,
        }
    }
}

/// Lifecycle position of a stored document. Deletion is terminal and leaves
/// nothing behind, so it has no variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentState {
    Active,
    Stale,
}

/// Store-managed fields of a document, decoded at the store boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreMeta {
    pub fingerprint: Option<String>,
    pub last_seen_run_id: Option<String>,
    pub stale: bool,
    pub stale_at: StaleAt,
    pub updated_at: Option<DateTime<Utc>>,
    pub source_updated_at: Option<DateTime<Utc>>,
}

impl StoreMeta {
    pub fn state(&self) -> DocumentState {
        if self.stale {
            DocumentState::Stale
        } else {
            DocumentState::Active
        }
    }
}

impl Default for StoreMeta {
    fn default() -> Self {
        Self {
            fingerprint: None,
            last_seen_run_id: None,
            stale: false,
            stale_at: StaleAt::Absent,
            updated_at: None,
            source_updated_at: None,
        }
    }
}
