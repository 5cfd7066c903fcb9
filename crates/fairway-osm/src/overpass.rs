//! Overpass API fetcher.
//!
//! One POST per partition; the query selects every `leisure=golf_course`
//! node/way/relation inside the partition's ISO 3166-2 area and asks for
//! centroids so ways and relations carry a usable coordinate.
//!
//! Status classification:
//! - network/timeout, 429, 5xx, or an Overpass "runtime error" remark -> transient
//! - any other non-2xx, or an undecodable body -> permanent

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::provider::{FetchError, PartitionFetcher, RawElement};

/// Server-side query timeout passed to Overpass, in seconds.
const QUERY_TIMEOUT_SECS: u32 = 90;

#[derive(Debug, Clone)]
pub struct OverpassProvider {
    http: reqwest::Client,
    url: String,
    /// ISO 3166-1 prefix for area lookups (e.g. `"US"`).
    country: String,
}

impl OverpassProvider {
    pub fn new(
        url: impl Into<String>,
        country: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("fairway/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Permanent(format!("http client build failed: {e}")))?;
        Ok(Self {
            http,
            url: url.into(),
            country: country.into(),
        })
    }

    /// Overpass QL for one partition.
    pub fn query_for_partition(&self, partition: &str) -> String {
        build_area_query(&self.country, partition)
    }
}

/// Overpass QL selecting golf courses inside `<country>-<subdivision>`.
pub fn build_area_query(country: &str, subdivision: &str) -> String {
    let iso = format!("{}-{}", country, subdivision);
    format!(
        r#"[out:json][timeout:{QUERY_TIMEOUT_SECS}];
area["ISO3166-2"="{iso}"]->.searchArea;
(
  node["leisure"="golf_course"](area.searchArea);
  way["leisure"="golf_course"](area.searchArea);
  relation["leisure"="golf_course"](area.searchArea);
);
out center tags;"#
    )
}

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<RawElement>,
    /// Set by Overpass when the query hit a runtime limit; data may be partial.
    #[serde(default)]
    remark: Option<String>,
}

fn classify_send_error(e: reqwest::Error) -> FetchError {
    if e.is_builder() {
        FetchError::Permanent(format!("overpass request build failed: {e}"))
    } else {
        FetchError::Transient(format!("overpass request failed: {e}"))
    }
}

fn classify_status(status: StatusCode) -> Option<FetchError> {
    if status.is_success() {
        return None;
    }
    let msg = format!("overpass http status={}", status.as_u16());
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Some(FetchError::Transient(msg))
    } else {
        Some(FetchError::Permanent(msg))
    }
}

#[async_trait::async_trait]
impl PartitionFetcher for OverpassProvider {
    fn source_name(&self) -> &'static str {
        "overpass"
    }

    async fn fetch_partition(&self, partition: &str) -> Result<Vec<RawElement>, FetchError> {
        let query = self.query_for_partition(partition);
        debug!(partition, url = %self.url, "overpass query");

        let resp = self
            .http
            .post(&self.url)
            .form(&[("data", query.as_str())])
            .send()
            .await
            .map_err(classify_send_error)?;

        if let Some(err) = classify_status(resp.status()) {
            return Err(err);
        }

        let body: OverpassResponse = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Transient(format!("overpass body read timed out: {e}"))
            } else {
                FetchError::Permanent(format!("overpass response json decode failed: {e}"))
            }
        })?;

        if let Some(remark) = body.remark.as_deref() {
            if remark.contains("runtime error") {
                return Err(FetchError::Transient(format!("overpass remark: {remark}")));
            }
        }

        Ok(body.elements)
    }
}
