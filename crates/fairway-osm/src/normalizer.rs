//! Raw element -> canonical entity.
//!
//! Pure: no IO, no clock. The provenance tag comes in through
//! [`NormalizeContext`] so the same element always yields the same result.

use std::collections::HashSet;
use std::fmt;

use serde_json::Value;

use fairway_schemas::{CanonicalEntity, ALLOWED_HOLE_COUNTS, MAX_ALIASES};

use crate::provider::RawElement;

/// Category tag value that marks a target facility.
pub const TARGET_LEISURE: &str = "golf_course";

const HOLES_TAGS: [&str; 2] = ["golf:holes", "holes"];
const CITY_TAGS: [&str; 2] = ["addr:city", "is_in:city"];
const STATE_TAGS: [&str; 3] = ["addr:state", "is_in:state_code", "is_in:state"];
const COUNTRY_TAGS: [&str; 3] = ["addr:country", "is_in:country_code", "is_in:country"];
const WEBSITE_TAGS: [&str; 3] = ["website", "contact:website", "url"];
const ALIAS_TAGS: [&str; 4] = ["alt_name", "short_name", "official_name", "name:en"];

/// Lowercased spellings mapped onto the home country code.
const HOME_COUNTRY_ALIASES: [&str; 3] = ["us", "usa", "united states"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizeContext {
    /// Stamped onto every entity, e.g. `"osm:2026-10"`.
    pub source_tag: String,
    /// Used when the element carries no country at all.
    pub home_country: String,
}

impl NormalizeContext {
    pub fn new(source_tag: impl Into<String>, home_country: impl Into<String>) -> Self {
        Self {
            source_tag: source_tag.into(),
            home_country: home_country.into(),
        }
    }
}

/// Why an element did not become an entity. Expected and not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    NotTargetFacility,
    MissingName,
    MissingCoordinates,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::NotTargetFacility => "not_target_facility",
            Rejection::MissingName => "missing_name",
            Rejection::MissingCoordinates => "missing_coordinates",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn normalize(el: &RawElement, ctx: &NormalizeContext) -> Result<CanonicalEntity, Rejection> {
    let tags = &el.tags;

    if tag_str(el, "leisure") != Some(TARGET_LEISURE) {
        return Err(Rejection::NotTargetFacility);
    }

    let name = tag_str(el, "name")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(Rejection::MissingName)?
        .to_string();

    let (lat, lng) = coordinates(el).ok_or(Rejection::MissingCoordinates)?;

    let city = first_tag(el, &CITY_TAGS).map(str::to_string);
    let state = first_tag(el, &STATE_TAGS).map(normalize_state);
    let country = first_tag(el, &COUNTRY_TAGS)
        .map(|c| normalize_country(c, &ctx.home_country))
        .unwrap_or_else(|| ctx.home_country.clone());

    let holes = HOLES_TAGS
        .iter()
        .filter_map(|k| tags.get(*k))
        .find(|v| !is_falsy(v))
        .and_then(parse_holes);

    let website = WEBSITE_TAGS
        .iter()
        .filter_map(|k| tag_str(el, k))
        .map(str::trim)
        .find(|v| is_absolute_url(v))
        .map(str::to_string);

    let external_id = external_id(el);

    Ok(CanonicalEntity {
        name_lower: name.to_lowercase(),
        name,
        aliases: collect_aliases(el),
        city,
        state,
        country,
        lat,
        lng,
        holes,
        website,
        external_id,
        source_tag: ctx.source_tag.clone(),
    })
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn tag_str<'a>(el: &'a RawElement, key: &str) -> Option<&'a str> {
    el.tags.get(key).and_then(Value::as_str)
}

/// First non-blank string value among `keys`, trimmed.
fn first_tag<'a>(el: &'a RawElement, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| tag_str(el, k))
        .map(str::trim)
        .find(|v| !v.is_empty())
}

fn is_falsy(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

fn normalize_state(raw: &str) -> String {
    if raw.chars().count() == 2 {
        raw.to_uppercase()
    } else {
        raw.to_string()
    }
}

fn normalize_country(raw: &str, home_country: &str) -> String {
    if raw.chars().count() == 2 {
        return raw.to_uppercase();
    }
    let lower = raw.to_lowercase();
    if HOME_COUNTRY_ALIASES.contains(&lower.as_str()) {
        home_country.to_string()
    } else {
        raw.to_string()
    }
}

fn to_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Direct `lat`/`lon` when both are present, else the centroid.
fn coordinates(el: &RawElement) -> Option<(f64, f64)> {
    let (lat, lon) = match (&el.lat, &el.lon) {
        (Some(lat), Some(lon)) if !lat.is_null() && !lon.is_null() => (lat.clone(), lon.clone()),
        _ => {
            let center = el.center.as_ref()?;
            (center.get("lat")?.clone(), center.get("lon")?.clone())
        }
    };
    let lat = to_f64(&lat)?;
    let lng = to_f64(&lon)?;
    let valid = lat.is_finite()
        && lng.is_finite()
        && (-90.0..=90.0).contains(&lat)
        && (-180.0..=180.0).contains(&lng);
    valid.then_some((lat, lng))
}

/// Numbers must be integral and allowed. Strings yield the first allowed
/// count found by substring at the earliest position.
fn parse_holes(v: &Value) -> Option<u32> {
    match v {
        Value::Number(n) => {
            let f = n.as_f64()?;
            if f.fract() != 0.0 || f < 0.0 {
                return None;
            }
            let h = f as u32;
            ALLOWED_HOLE_COUNTS.contains(&h).then_some(h)
        }
        Value::String(s) => first_allowed_count(s),
        _ => None,
    }
}

fn first_allowed_count(s: &str) -> Option<u32> {
    for start in 0..s.len() {
        let rest = match s.get(start..) {
            Some(r) => r,
            None => continue,
        };
        // Alternation order matters at a given position: "9" before "18" etc.
        for count in ALLOWED_HOLE_COUNTS {
            if rest.starts_with(count.to_string().as_str()) {
                return Some(count);
            }
        }
    }
    None
}

fn is_absolute_url(v: &str) -> bool {
    let lower = v.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn collect_aliases(el: &RawElement) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for key in ALIAS_TAGS {
        let Some(raw) = tag_str(el, key) else {
            continue;
        };
        for part in raw.split([';', ',']).map(str::trim).filter(|s| !s.is_empty()) {
            if seen.insert(part.to_lowercase()) {
                out.push(part.to_string());
            }
        }
    }
    out.truncate(MAX_ALIASES);
    out
}

fn external_id(el: &RawElement) -> Option<String> {
    let kind = el.element_type.as_deref().filter(|t| !t.is_empty())?;
    let id = match el.id.as_ref()? {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Some(format!("{kind}:{id}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> NormalizeContext {
        NormalizeContext::new("osm:2026-10", "US")
    }

    fn el(v: Value) -> RawElement {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn full_node_normalizes() {
        let e = normalize(
            &el(json!({
                "type": "node", "id": 42, "lat": 43.1, "lon": -77.6,
                "tags": {
                    "leisure": "golf_course", "name": " Oak Hill ",
                    "addr:city": "Rochester", "addr:state": "ny",
                    "golf:holes": "18", "url": "https://oakhillcc.com",
                    "alt_name": "Oak Hill CC; Oak Hill Country Club",
                    "short_name": "oak hill cc"
                }
            })),
            &ctx(),
        )
        .unwrap();

        assert_eq!(e.name, "Oak Hill");
        assert_eq!(e.name_lower, "oak hill");
        assert_eq!(e.city.as_deref(), Some("Rochester"));
        assert_eq!(e.state.as_deref(), Some("NY"));
        assert_eq!(e.country, "US");
        assert_eq!(e.holes, Some(18));
        assert_eq!(e.website.as_deref(), Some("https://oakhillcc.com"));
        assert_eq!(e.aliases, vec!["Oak Hill CC", "Oak Hill Country Club"]);
        assert_eq!(e.external_id.as_deref(), Some("node:42"));
        assert_eq!(e.source_tag, "osm:2026-10");
    }

    #[test]
    fn rejects_wrong_category_blank_name_and_missing_coordinates() {
        let wrong = el(json!({"lat": 1.0, "lon": 1.0, "tags": {"leisure": "park", "name": "X"}}));
        assert_eq!(normalize(&wrong, &ctx()), Err(Rejection::NotTargetFacility));

        let blank = el(json!({"lat": 1.0, "lon": 1.0, "tags": {"leisure": "golf_course", "name": "  "}}));
        assert_eq!(normalize(&blank, &ctx()), Err(Rejection::MissingName));

        let nowhere = el(json!({"tags": {"leisure": "golf_course", "name": "X"}}));
        assert_eq!(normalize(&nowhere, &ctx()), Err(Rejection::MissingCoordinates));

        let bad_center = el(json!({"lat": 1.0, "center": {"lat": 2.0},
            "tags": {"leisure": "golf_course", "name": "X"}}));
        assert_eq!(normalize(&bad_center, &ctx()), Err(Rejection::MissingCoordinates));

        let garbage = el(json!({"lat": "north", "lon": 1.0,
            "tags": {"leisure": "golf_course", "name": "X"}}));
        assert_eq!(normalize(&garbage, &ctx()), Err(Rejection::MissingCoordinates));
    }

    #[test]
    fn centroid_is_used_when_direct_coordinates_are_incomplete() {
        let e = normalize(
            &el(json!({"type": "way", "id": 9, "lat": 10.0,
                "center": {"lat": 40.5, "lon": "-75.25"},
                "tags": {"leisure": "golf_course", "name": "Ridge"}})),
            &ctx(),
        )
        .unwrap();
        assert_eq!((e.lat, e.lng), (40.5, -75.25));
        assert_eq!(e.external_id.as_deref(), Some("way:9"));
    }

    #[test]
    fn out_of_range_coordinates_are_rejected() {
        let e = el(json!({"lat": 123.0, "lon": 0.0, "tags": {"leisure": "golf_course", "name": "X"}}));
        assert_eq!(normalize(&e, &ctx()), Err(Rejection::MissingCoordinates));
    }

    #[test]
    fn holes_parsing() {
        assert_eq!(parse_holes(&json!(18)), Some(18));
        assert_eq!(parse_holes(&json!(27.0)), Some(27));
        assert_eq!(parse_holes(&json!(12)), None);
        assert_eq!(parse_holes(&json!(18.5)), None);
        assert_eq!(parse_holes(&json!("18 holes")), Some(18));
        assert_eq!(parse_holes(&json!("9+9")), Some(9));
        assert_eq!(parse_holes(&json!("36;18")), Some(36));
        assert_eq!(parse_holes(&json!("twelve")), None);
        assert_eq!(parse_holes(&json!(true)), None);
    }

    #[test]
    fn holes_fall_back_to_second_tag_only_when_first_is_empty() {
        let e = normalize(
            &el(json!({"lat": 1.0, "lon": 1.0, "tags": {
                "leisure": "golf_course", "name": "X", "golf:holes": "", "holes": "9"}})),
            &ctx(),
        )
        .unwrap();
        assert_eq!(e.holes, Some(9));

        let e = normalize(
            &el(json!({"lat": 1.0, "lon": 1.0, "tags": {
                "leisure": "golf_course", "name": "X", "golf:holes": "lots", "holes": "9"}})),
            &ctx(),
        )
        .unwrap();
        assert_eq!(e.holes, None);
    }

    #[test]
    fn country_inference() {
        let base = |country: Option<&str>| {
            let mut tags = json!({"leisure": "golf_course", "name": "X"});
            if let Some(c) = country {
                tags["addr:country"] = json!(c);
            }
            normalize(&el(json!({"lat": 1.0, "lon": 1.0, "tags": tags})), &ctx())
                .unwrap()
                .country
        };
        assert_eq!(base(None), "US");
        assert_eq!(base(Some("ca")), "CA");
        assert_eq!(base(Some("United States")), "US");
        assert_eq!(base(Some("USA")), "US");
        assert_eq!(base(Some("Canada")), "Canada");
    }

    #[test]
    fn website_requires_scheme_and_follows_priority() {
        let e = normalize(
            &el(json!({"lat": 1.0, "lon": 1.0, "tags": {
                "leisure": "golf_course", "name": "X",
                "website": "www.example.com",
                "contact:website": "http://example.org",
                "url": "https://example.net"}})),
            &ctx(),
        )
        .unwrap();
        assert_eq!(e.website.as_deref(), Some("http://example.org"));
    }

    #[test]
    fn aliases_are_deduped_and_capped() {
        let many = (0..15).map(|i| format!("Alias {i}")).collect::<Vec<_>>().join(";");
        let e = normalize(
            &el(json!({"lat": 1.0, "lon": 1.0, "tags": {
                "leisure": "golf_course", "name": "X",
                "alt_name": many, "name:en": "ALIAS 0"}})),
            &ctx(),
        )
        .unwrap();
        assert_eq!(e.aliases.len(), MAX_ALIASES);
        assert_eq!(e.aliases[0], "Alias 0");
    }

    #[test]
    fn normalize_is_deterministic() {
        let raw = el(json!({"type": "relation", "id": "77", "lat": 1.0, "lon": 2.0,
            "tags": {"leisure": "golf_course", "name": "Links", "holes": 54}}));
        assert_eq!(normalize(&raw, &ctx()), normalize(&raw, &ctx()));
        assert_eq!(
            normalize(&raw, &ctx()).unwrap().external_id.as_deref(),
            Some("relation:77")
        );
    }
}
