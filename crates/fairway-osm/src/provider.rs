//! Provider boundary for point-of-interest ingestion.
//!
//! This module defines **only** the raw element type, the fetch error
//! taxonomy and the fetcher trait. No HTTP, no retry, no canonicalization.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Raw element
// ---------------------------------------------------------------------------

/// One element exactly as returned by the geodata query service.
///
/// Deliberately loose: coordinates and ids stay as JSON values so the
/// canonicalizer decides what is usable. Nothing here is validated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawElement {
    /// `node`, `way` or `relation`.
    #[serde(rename = "type", default)]
    pub element_type: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub lat: Option<Value>,
    #[serde(default)]
    pub lon: Option<Value>,
    /// Centroid for ways/relations (`out center`), usually `{lat, lon}`.
    #[serde(default)]
    pub center: Option<Value>,
    /// Free-form tag map.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tags: BTreeMap<String, Value>,
}

impl RawElement {
    /// Convenience constructor for fixtures: a node with the given tags.
    pub fn node(id: i64, lat: f64, lon: f64, tags: &[(&str, &str)]) -> Self {
        Self {
            element_type: Some("node".to_string()),
            id: Some(Value::from(id)),
            lat: Some(Value::from(lat)),
            lon: Some(Value::from(lon)),
            center: None,
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), Value::from(*v)))
                .collect(),
        }
    }
}

fn null_as_empty<'de, D>(de: D) -> Result<BTreeMap<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<BTreeMap<String, Value>>::deserialize(de)?.unwrap_or_default())
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors a [`PartitionFetcher`] may return.
///
/// Only `Transient` is worth retrying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Network failure, timeout, rate limit, 5xx, or a server-side runtime error.
    Transient(String),
    /// Bad request, undecodable payload, or misconfiguration.
    Permanent(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Transient(msg) => write!(f, "transient fetch failure: {msg}"),
            FetchError::Permanent(msg) => write!(f, "permanent fetch failure: {msg}"),
        }
    }
}

impl std::error::Error for FetchError {}

// ---------------------------------------------------------------------------
// Fetcher trait
// ---------------------------------------------------------------------------

/// Fetch all raw elements for one partition.
///
/// Object safe and `Send + Sync` so a pipeline can hold `Arc<dyn PartitionFetcher>`
/// and drive several partitions at once.
#[async_trait::async_trait]
pub trait PartitionFetcher: Send + Sync {
    /// Human-readable name (e.g. `"overpass"`).
    fn source_name(&self) -> &'static str;

    async fn fetch_partition(&self, partition: &str) -> Result<Vec<RawElement>, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_element_tolerates_null_tags_and_missing_fields() {
        let el: RawElement =
            serde_json::from_str(r#"{"type":"way","id":7,"tags":null}"#).unwrap();
        assert_eq!(el.element_type.as_deref(), Some("way"));
        assert!(el.tags.is_empty());
        assert!(el.lat.is_none());
        assert!(el.center.is_none());
    }

    #[test]
    fn raw_element_keeps_untyped_coordinates() {
        let el: RawElement = serde_json::from_str(
            r#"{"type":"node","id":1,"lat":"43.1","lon":-77.6,"tags":{"golf:holes":18}}"#,
        )
        .unwrap();
        assert_eq!(el.lat, Some(Value::from("43.1")));
        assert_eq!(el.tags.get("golf:holes"), Some(&Value::from(18)));
    }

    #[test]
    fn fetch_error_display() {
        assert_eq!(
            FetchError::Transient("http 503".into()).to_string(),
            "transient fetch failure: http 503"
        );
        assert!(!FetchError::Permanent("http 400".into()).is_transient());
    }
}
