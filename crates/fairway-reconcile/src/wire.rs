//! Typed ops and documents <-> JSON documents.
//!
//! This is the only place that knows store field names. Timestamps are stored
//! as RFC 3339 strings.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use fairway_schemas::{StaleAt, StoreMeta, TimestampValue};

use crate::store::{DocumentFilter, StoredDocument, WriteOp};

pub const F_NAME: &str = "name";
pub const F_NAME_LOWER: &str = "name_lower";
pub const F_ALIASES: &str = "aliases";
pub const F_CITY: &str = "city";
pub const F_STATE: &str = "state";
pub const F_COUNTRY: &str = "country";
pub const F_LAT: &str = "lat";
pub const F_LNG: &str = "lng";
pub const F_HOLES: &str = "holes";
pub const F_WEBSITE: &str = "website";
pub const F_EXTERNAL_ID: &str = "external_id";
pub const F_SOURCE: &str = "source";
pub const F_FINGERPRINT: &str = "fingerprint";
pub const F_UPDATED_AT: &str = "updated_at";
pub const F_SOURCE_UPDATED_AT: &str = "source_updated_at";
pub const F_LAST_SEEN_RUN_ID: &str = "last_seen_run_id";
pub const F_STALE: &str = "stale";
pub const F_STALE_AT: &str = "stale_at";

/// A merge write in wire form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeFields {
    /// Fields overwritten with these values.
    pub set: Map<String, Value>,
    /// Fields set to the commit timestamp by the backend.
    pub server_now: Vec<&'static str>,
    /// Fields removed from the document.
    pub remove: Vec<&'static str>,
}

/// A write op in wire form.
#[derive(Debug, Clone, PartialEq)]
pub enum WireWrite {
    Merge { key: String, fields: MergeFields },
    Delete { key: String },
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn put_timestamp(fields: &mut MergeFields, name: &'static str, value: TimestampValue) {
    match value {
        TimestampValue::ServerNow => fields.server_now.push(name),
        TimestampValue::At(ts) => {
            fields.set.insert(name.to_string(), Value::from(format_timestamp(ts)));
        }
    }
}

pub fn encode_write(op: &WriteOp) -> WireWrite {
    match op {
        WriteOp::Upsert {
            key,
            entity,
            fingerprint,
            run_id,
        } => {
            let mut f = MergeFields::default();
            let set = &mut f.set;
            set.insert(F_NAME.into(), Value::from(entity.name.clone()));
            set.insert(F_NAME_LOWER.into(), Value::from(entity.name_lower.clone()));
            set.insert(F_ALIASES.into(), Value::from(entity.aliases.clone()));
            set.insert(F_CITY.into(), Value::from(entity.city.clone()));
            set.insert(F_STATE.into(), Value::from(entity.state.clone()));
            set.insert(F_COUNTRY.into(), Value::from(entity.country.clone()));
            set.insert(F_LAT.into(), Value::from(entity.lat));
            set.insert(F_LNG.into(), Value::from(entity.lng));
            set.insert(F_HOLES.into(), Value::from(entity.holes));
            set.insert(F_WEBSITE.into(), Value::from(entity.website.clone()));
            set.insert(F_EXTERNAL_ID.into(), Value::from(entity.external_id.clone()));
            set.insert(F_SOURCE.into(), Value::from(entity.source_tag.clone()));
            set.insert(F_FINGERPRINT.into(), Value::from(fingerprint.clone()));
            set.insert(F_LAST_SEEN_RUN_ID.into(), Value::from(run_id.clone()));
            set.insert(F_STALE.into(), Value::Bool(false));
            f.server_now = vec![F_UPDATED_AT, F_SOURCE_UPDATED_AT];
            f.remove = vec![F_STALE_AT];
            WireWrite::Merge {
                key: key.clone(),
                fields: f,
            }
        }
        WriteOp::MarkStale { key, stale_at } => {
            let mut f = MergeFields::default();
            f.set.insert(F_STALE.into(), Value::Bool(true));
            put_timestamp(&mut f, F_STALE_AT, *stale_at);
            WireWrite::Merge {
                key: key.clone(),
                fields: f,
            }
        }
        WriteOp::Delete { key } => WireWrite::Delete { key: key.clone() },
    }
}

/// Filter as a JSON object of required field values.
pub fn encode_filter(filter: &DocumentFilter) -> Map<String, Value> {
    let mut m = Map::new();
    if let Some(c) = &filter.country {
        m.insert(F_COUNTRY.into(), Value::from(c.clone()));
    }
    if let Some(s) = &filter.state {
        m.insert(F_STATE.into(), Value::from(s.clone()));
    }
    if let Some(stale) = filter.stale {
        m.insert(F_STALE.into(), Value::Bool(stale));
    }
    m
}

/// True when every predicate in `filter` equals the document's field.
pub fn matches_filter(doc: &Map<String, Value>, filter: &Map<String, Value>) -> bool {
    filter.iter().all(|(k, v)| doc.get(k) == Some(v))
}

fn parse_timestamp(v: &Value) -> Option<DateTime<Utc>> {
    v.as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|ts| ts.with_timezone(&Utc))
}

fn decode_stale_at(v: Option<&Value>) -> StaleAt {
    match v {
        None | Some(Value::Null) => StaleAt::Absent,
        Some(raw) => match parse_timestamp(raw) {
            Some(ts) => StaleAt::At(ts),
            None => StaleAt::Malformed(raw.to_string()),
        },
    }
}

/// Decode store-managed fields. Never fails: unexpected shapes degrade to
/// "absent" (or [`StaleAt::Malformed`] for `stale_at`).
pub fn decode_document(key: &str, doc: &Map<String, Value>) -> StoredDocument {
    let string = |name: &str| doc.get(name).and_then(Value::as_str).map(str::to_string);
    StoredDocument {
        key: key.to_string(),
        meta: StoreMeta {
            fingerprint: string(F_FINGERPRINT),
            last_seen_run_id: string(F_LAST_SEEN_RUN_ID),
            stale: doc.get(F_STALE).and_then(Value::as_bool).unwrap_or(false),
            stale_at: decode_stale_at(doc.get(F_STALE_AT)),
            updated_at: doc.get(F_UPDATED_AT).and_then(parse_timestamp),
            source_updated_at: doc.get(F_SOURCE_UPDATED_AT).and_then(parse_timestamp),
        },
    }
}
