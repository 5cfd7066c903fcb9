//! Document identity and content fingerprint.
//!
//! Both are pure functions of the entity:
//! - the key depends on `name`, `city` and `state` only;
//! - the fingerprint depends on the semantic fields only, never on
//!   `source_tag`, `external_id` or anything the store manages.

use serde::Serialize;
use sha2::{Digest, Sha256};

use fairway_schemas::CanonicalEntity;

/// Upper bound on document key length, in characters.
pub const MAX_KEY_LEN: usize = 200;

/// Lowercase, path-safe slug of the non-empty `parts` joined with `-`.
///
/// Characters outside `[a-z0-9-]` and whitespace are dropped first (so `_`
/// simply disappears); each remaining whitespace run becomes one `-`, and
/// leading/trailing `-` are trimmed before truncating to [`MAX_KEY_LEN`].
/// A whitespace-only part still counts as a part.
pub fn slugify(parts: &[&str]) -> String {
    let joined = parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase();

    let mut out = String::with_capacity(joined.len());
    let mut in_gap = false;
    for c in joined.chars() {
        if is_slug_space(c) {
            in_gap = true;
            continue;
        }
        if !(c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
            continue;
        }
        if in_gap {
            out.push('-');
            in_gap = false;
        }
        out.push(c);
    }

    let trimmed = out.trim_matches('-');
    // Only ASCII survives the filter, so byte and char lengths agree.
    trimmed[..trimmed.len().min(MAX_KEY_LEN)].to_string()
}

/// Unicode whitespace plus the information separators U+001C..U+001F.
fn is_slug_space(c: char) -> bool {
    c.is_whitespace() || ('\u{1c}'..='\u{1f}').contains(&c)
}

pub fn document_key(entity: &CanonicalEntity) -> String {
    slugify(&[
        entity.name.as_str(),
        entity.city.as_deref().unwrap_or(""),
        entity.state.as_deref().unwrap_or(""),
    ])
}

/// Canonical payload hashed by [`fingerprint`]. Field order is alphabetical,
/// which serde_json preserves, so the encoding has sorted keys.
#[derive(Serialize)]
struct FingerprintPayload<'a> {
    aliases: Vec<String>,
    city: &'a str,
    country: &'a str,
    holes: Option<u32>,
    lat: f64,
    lng: f64,
    name_lower: &'a str,
    state: &'a str,
    website: &'a str,
}

/// SHA-256 hex digest of the semantic fields in compact sorted-key JSON.
/// Absent strings hash as `""`; aliases are compared lowercased and sorted.
///
/// `None` when a coordinate is NaN or infinite: such an entity has no
/// canonical encoding and must not be written.
pub fn fingerprint(entity: &CanonicalEntity) -> Option<String> {
    if !(entity.lat.is_finite() && entity.lng.is_finite()) {
        return None;
    }

    let mut aliases: Vec<String> = entity.aliases.iter().map(|a| a.to_lowercase()).collect();
    aliases.sort();

    let payload = FingerprintPayload {
        aliases,
        city: entity.city.as_deref().unwrap_or(""),
        country: entity.country.as_str(),
        holes: entity.holes,
        lat: entity.lat,
        lng: entity.lng,
        name_lower: entity.name_lower.as_str(),
        state: entity.state.as_deref().unwrap_or(""),
        website: entity.website.as_deref().unwrap_or(""),
    };

    let encoded = serde_json::to_vec(&payload).ok()?;
    Some(hex::encode(Sha256::digest(&encoded)))
}
