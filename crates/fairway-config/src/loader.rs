//! Typed loader settings.
//!
//! Built from the merged config JSON with serde defaults, then optionally
//! patched from the environment through an injected lookup so tests never
//! depend on process state.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const ENV_OVERPASS_URL: &str = "OVERPASS_API_URL";
pub const ENV_COLLECTION: &str = "FAIRWAY_COLLECTION";

pub const DEFAULT_OVERPASS_URL: &str = "https://overpass-api.de/api/interpreter";
pub const DEFAULT_DATABASE_URL_ENV: &str = "FAIRWAY_DATABASE_URL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub store: StoreSettings,
    pub fetch: FetchSettings,
    pub reconcile: ReconcileSettings,
    pub run: RunSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub collection: String,
    /// NAME of the env var holding the database URL (never the URL itself).
    pub database_url_env: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub overpass_url: String,
    pub timeout_secs: u64,
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileSettings {
    pub read_batch_size: usize,
    pub write_batch_size: usize,
    pub home_country: String,
    pub source_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Partitions processed at once. 1 = strictly sequential.
    pub concurrency: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            collection: "courses".to_string(),
            database_url_env: DEFAULT_DATABASE_URL_ENV.to_string(),
        }
    }
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            overpass_url: DEFAULT_OVERPASS_URL.to_string(),
            timeout_secs: 120,
            retry: RetrySettings::default(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 60_000,
        }
    }
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            read_batch_size: 300,
            write_batch_size: 400,
            home_country: "US".to_string(),
            source_prefix: "osm".to_string(),
        }
    }
}

impl Default for RunSettings {
    fn default() -> Self {
        Self { concurrency: 1 }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            store: StoreSettings::default(),
            fetch: FetchSettings::default(),
            reconcile: ReconcileSettings::default(),
            run: RunSettings::default(),
        }
    }
}

impl LoaderConfig {
    pub fn from_json(v: &Value) -> Result<Self> {
        let cfg: LoaderConfig =
            serde_json::from_value(v.clone()).context("config does not match loader schema")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply env overrides. `lookup` is usually `|k| std::env::var(k).ok()`.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        if let Some(url) = non_empty(ENV_OVERPASS_URL) {
            self.fetch.overpass_url = url;
        }
        if let Some(collection) = non_empty(ENV_COLLECTION) {
            self.store.collection = collection;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.collection.trim().is_empty() {
            bail!("store.collection must not be empty");
        }
        if self.reconcile.read_batch_size == 0 || self.reconcile.write_batch_size == 0 {
            bail!(
                "reconcile batch sizes must be > 0 (read={}, write={})",
                self.reconcile.read_batch_size,
                self.reconcile.write_batch_size
            );
        }
        if self.fetch.retry.max_attempts == 0 {
            bail!("fetch.retry.max_attempts must be >= 1");
        }
        if !(self.fetch.retry.multiplier >= 1.0) {
            bail!(
                "fetch.retry.multiplier must be >= 1.0, got {}",
                self.fetch.retry.multiplier
            );
        }
        if self.run.concurrency == 0 {
            bail!("run.concurrency must be >= 1");
        }
        let hc = self.reconcile.home_country.trim();
        if hc.len() != 2 || !hc.chars().all(|c| c.is_ascii_uppercase()) {
            bail!(
                "reconcile.home_country must be a 2-letter uppercase code, got '{}'",
                self.reconcile.home_country
            );
        }
        Ok(())
    }
}
