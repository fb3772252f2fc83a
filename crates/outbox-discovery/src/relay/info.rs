//! NIP-11 relay information, cached per endpoint with moka.
//!
//! Relays serve a JSON document at their HTTP URL when asked with
//! `Accept: application/nostr+json`. We keep the fields the orchestrator
//! shows next to an endpoint: display name, icon, supported NIPs, and the
//! measured round-trip time of the request.

use std::time::{Duration, Instant};

use moka::future::Cache;
use outbox_core::url::to_http_url;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default number of cached relay documents.
pub const DEFAULT_CACHE_CAPACITY: u64 = 1000;

/// Default TTL for a cached relay document.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Capability metadata advertised by an endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelayCapabilities {
    pub name: Option<String>,
    pub icon: Option<String>,
    /// Supported NIP numbers, sorted and deduplicated.
    pub supported_nips: Vec<u16>,
    /// Round-trip time of the information request, in milliseconds.
    pub rtt_ms: Option<u64>,
}

impl RelayCapabilities {
    /// Whether the endpoint claims support for `nip`.
    pub fn supports(&self, nip: u16) -> bool {
        self.supported_nips.binary_search(&nip).is_ok()
    }

    /// Parse a NIP-11 document body.
    pub fn from_json(json: &str, rtt: Option<Duration>) -> Result<Self> {
        let doc: RelayInformationDocument = serde_json::from_str(json)?;
        Ok(Self::from_document(doc, rtt))
    }

    fn from_document(doc: RelayInformationDocument, rtt: Option<Duration>) -> Self {
        // Some relays advertise NIPs as strings ("11") instead of numbers.
        let mut supported_nips: Vec<u16> = doc
            .supported_nips
            .iter()
            .filter_map(|v| match v {
                serde_json::Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
                serde_json::Value::String(s) => s.trim().parse().ok(),
                _ => None,
            })
            .collect();
        supported_nips.sort_unstable();
        supported_nips.dedup();

        Self {
            name: doc.name.filter(|s| !s.trim().is_empty()),
            icon: doc.icon.filter(|s| !s.trim().is_empty()),
            supported_nips,
            rtt_ms: rtt.map(|d| d.as_millis() as u64),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RelayInformationDocument {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    icon: Option<String>,
    #[serde(default)]
    supported_nips: Vec<serde_json::Value>,
}

/// Fetches and caches NIP-11 documents.
#[derive(Clone)]
pub struct CapabilityFetcher {
    http: reqwest::Client,
    cache: Cache<String, RelayCapabilities>,
}

impl CapabilityFetcher {
    /// Create a fetcher with a per-request timeout and the default cache policy.
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("outbox-discovery/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            cache: Cache::builder()
                .max_capacity(DEFAULT_CACHE_CAPACITY)
                .time_to_live(DEFAULT_TTL)
                .build(),
        })
    }

    /// Fetch the capabilities of a normalized endpoint URL, using the cache.
    pub async fn fetch(&self, url: &str) -> Result<RelayCapabilities> {
        if let Some(cached) = self.cache.get(url).await {
            return Ok(cached);
        }

        let started = Instant::now();
        let body = self
            .http
            .get(to_http_url(url))
            .header(reqwest::header::ACCEPT, "application/nostr+json")
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let rtt = started.elapsed();
        metrics::histogram!("relay_info_fetch_duration_seconds").record(rtt.as_secs_f64());

        let capabilities = RelayCapabilities::from_json(&body, Some(rtt))?;
        tracing::debug!(
            "Relay info for {}: name={:?}, {} NIPs, {}ms",
            url,
            capabilities.name,
            capabilities.supported_nips.len(),
            rtt.as_millis()
        );

        self.cache.insert(url.to_string(), capabilities.clone()).await;
        Ok(capabilities)
    }

    /// Drop any cached document for `url`.
    pub async fn invalidate(&self, url: &str) {
        self.cache.invalidate(url).await;
    }
}
