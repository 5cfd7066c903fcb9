//! Ordered YAML layers -> one canonical JSON document + SHA-256 hash.
//!
//! Later layers override earlier ones key by key; objects merge recursively,
//! anything else is replaced wholesale. Config holds env var NAMES only, so a
//! leaf that looks like a credential aborts the load.

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::{for_each_leaf, pointer, LoaderConfig};

/// Leaf values starting with any of these abort with CONFIG_SECRET_DETECTED.
const SECRET_PREFIXES: &[&str] = &[
    "sk-",
    "AKIA",
    "-----BEGIN",
    "ghp_",
    "glpat-",
    "postgres://",
    "postgresql://",
];

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
}

impl LoadedConfig {
    /// No layers at all; every setting takes its default.
    pub fn empty() -> Result<Self> {
        load_layered_yaml_from_strings(&[])
    }

    /// Typed view of the merged document (serde defaults fill gaps).
    pub fn loader_config(&self) -> Result<LoaderConfig> {
        LoaderConfig::from_json(&self.config_json)
    }
}

pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let docs = paths
        .iter()
        .map(|p| std::fs::read_to_string(p).with_context(|| format!("read config layer {p}")))
        .collect::<Result<Vec<String>>>()?;
    let refs: Vec<&str> = docs.iter().map(String::as_str).collect();
    load_layered_yaml_from_strings(&refs)
}

pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Map::new());
    for (i, raw) in yaml_docs.iter().enumerate() {
        let layer: serde_yaml::Value =
            serde_yaml::from_str(raw).with_context(|| format!("config layer {i} is not valid yaml"))?;
        // An empty document parses as null and contributes nothing.
        if layer.is_null() {
            continue;
        }
        let layer = serde_json::to_value(layer)
            .with_context(|| format!("config layer {i} cannot be represented as json"))?;
        overlay(&mut merged, layer);
    }

    refuse_secret_literals(&merged)?;

    // serde_json's default map is key-ordered, so this is canonical for any
    // key order in the source YAML.
    let canonical_json = serde_json::to_string(&merged).context("serialize merged config")?;
    let config_hash = hex::encode(Sha256::digest(canonical_json.as_bytes()));
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
    })
}

fn overlay(base: &mut Value, top: Value) {
    match (base, top) {
        (Value::Object(base_map), Value::Object(top_map)) => {
            for (k, v) in top_map {
                match base_map.get_mut(&k) {
                    Some(existing) => overlay(existing, v),
                    None => {
                        base_map.insert(k, v);
                    }
                }
            }
        }
        (slot, v) => *slot = v,
    }
}

fn refuse_secret_literals(v: &Value) -> Result<()> {
    let mut offending: Option<String> = None;
    for_each_leaf(v, &mut Vec::new(), &mut |path, leaf| {
        if offending.is_none() && leaf.as_str().is_some_and(looks_like_secret) {
            offending = Some(pointer(path));
        }
    });
    match offending {
        Some(leaf) => bail!("CONFIG_SECRET_DETECTED leaf={leaf} value=REDACTED"),
        None => Ok(()),
    }
}

fn looks_like_secret(s: &str) -> bool {
    let t = s.trim();
    t.len() >= 8 && SECRET_PREFIXES.iter().any(|p| t.starts_with(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_layers_hash_is_stable() {
        let a = LoadedConfig::empty().unwrap();
        let b = load_layered_yaml_from_strings(&["", "{}"]).unwrap();
        assert_eq!(a.config_hash, b.config_hash);
        assert_eq!(a.canonical_json, "{}");
    }

    #[test]
    fn scalar_overlay_replaces_object() {
        let cfg = load_layered_yaml_from_strings(&["fetch:\n  retry:\n    max_attempts: 3\n", "fetch: null\n"])
            .unwrap();
        assert_eq!(cfg.canonical_json, r#"{"fetch":null}"#);
    }

    #[test]
    fn short_values_are_not_secrets() {
        assert!(!looks_like_secret("sk-1"));
        assert!(looks_like_secret("  ghp_0123456789"));
    }
}
