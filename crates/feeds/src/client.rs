//! HTTP ticker collection with per-source endpoint fallback.

use crate::adapter::{default_endpoints, ticker_records};
use crate::{FeedError, ResponseCache, TickerNormalizer};
use async_trait::async_trait;
use futures_util::future::join_all;
use nicp_core::{Clock, PairMap, Source, SourceHealth, SystemClock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Anything that can GET a URL and decode the body as JSON.
#[async_trait]
pub trait JsonFetcher: Send + Sync {
    async fn get_json(&self, url: &str) -> Result<Value, FeedError>;
}

/// reqwest-backed fetcher with a per-request timeout.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("nicp-tracker/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl JsonFetcher for HttpFetcher {
    async fn get_json(&self, url: &str) -> Result<Value, FeedError> {
        let url = url::Url::parse(url)?;
        let response = self.client.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(FeedError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        // Some endpoints answer text/plain with a JSON body.
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Fetch settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub request_timeout_secs: u64,
    pub cache_ttl_secs: i64,
    pub sources: Vec<Source>,
    /// Endpoint chains overriding the built-in ones.
    pub endpoints: BTreeMap<Source, Vec<String>>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 10,
            cache_ttl_secs: 30,
            sources: Source::all().to_vec(),
            endpoints: BTreeMap::new(),
        }
    }
}

impl FetchConfig {
    pub fn endpoints_for(&self, source: Source) -> Vec<String> {
        match self.endpoints.get(&source) {
            Some(urls) if !urls.is_empty() => urls.clone(),
            _ => default_endpoints(source)
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Normalized pairs and health from one source.
#[derive(Debug, Clone)]
pub struct SourceFetch {
    pub source: Source,
    pub pairs: PairMap,
    pub health: SourceHealth,
}

/// Result of fetching every configured source.
#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    pub pairs: BTreeMap<Source, PairMap>,
    pub health: BTreeMap<Source, SourceHealth>,
}

impl FetchReport {
    pub fn pair_count(&self) -> usize {
        self.pairs.values().map(|p| p.len()).sum()
    }
}

/// Polls ticker endpoints and normalizes what comes back.
pub struct TickerClient {
    fetcher: Arc<dyn JsonFetcher>,
    cache: ResponseCache<Value>,
    normalizer: TickerNormalizer,
    config: FetchConfig,
    clock: Arc<dyn Clock>,
}

impl TickerClient {
    pub fn new(
        fetcher: Arc<dyn JsonFetcher>,
        normalizer: TickerNormalizer,
        config: FetchConfig,
    ) -> Self {
        Self::with_clock(fetcher, normalizer, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        fetcher: Arc<dyn JsonFetcher>,
        normalizer: TickerNormalizer,
        config: FetchConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache = ResponseCache::with_clock(
            chrono::Duration::seconds(config.cache_ttl_secs),
            clock.clone(),
        );
        Self {
            fetcher,
            cache,
            normalizer,
            config,
            clock,
        }
    }

    pub fn cache(&self) -> &ResponseCache<Value> {
        &self.cache
    }

    /// Raw response of the first endpoint in the chain that answers with a ticker list.
    /// A fresh cached response from any endpoint is used before the network.
    pub async fn fetch_raw(&self, source: Source) -> Result<Value, FeedError> {
        let endpoints = self.config.endpoints_for(source);
        for url in &endpoints {
            if let Some(cached) = self.cache.get(url) {
                debug!(source = %source, url = %url, "Using cached tickers");
                return Ok(cached);
            }
        }

        let mut last_error: Option<FeedError> = None;
        for url in endpoints {
            let result = match self.fetcher.get_json(&url).await {
                Ok(body) => match ticker_records(&body).err() {
                    None => Ok(body),
                    Some(e) => Err(e),
                },
                Err(e) => Err(e),
            };

            match result {
                Ok(body) => {
                    self.cache.insert(url, body.clone());
                    return Ok(body);
                }
                Err(e) => {
                    warn!(source = %source, url = %url, error = %e, "Ticker endpoint failed");
                    last_error = Some(e);
                }
            }
        }

        Err(FeedError::AllEndpointsFailed {
            source_name: source.to_string(),
            last: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no endpoints configured".to_string()),
        })
    }

    /// Fetch and normalize one source. A failing source yields zero pairs.
    pub async fn fetch_source(&self, source: Source) -> SourceFetch {
        let checked_at = self.clock.now();
        match self.fetch_raw(source).await {
            Ok(body) => {
                let records = ticker_records(&body).unwrap_or_default();
                let pairs = self.normalizer.normalize(records, source);
                SourceFetch {
                    source,
                    health: SourceHealth {
                        connected: true,
                        pair_count: pairs.len(),
                        last_error: None,
                        checked_at,
                    },
                    pairs,
                }
            }
            Err(e) => {
                warn!(source = %source, error = %e, "Source unavailable this tick");
                SourceFetch {
                    source,
                    pairs: PairMap::new(),
                    health: SourceHealth {
                        connected: false,
                        pair_count: 0,
                        last_error: Some(e.to_string()),
                        checked_at,
                    },
                }
            }
        }
    }

    /// Fetch all configured sources concurrently.
    pub async fn fetch_all(&self) -> FetchReport {
        let futures = self
            .config
            .sources
            .iter()
            .map(|&source| self.fetch_source(source));
        let results = join_all(futures).await;

        let mut report = FetchReport::default();
        for fetch in results {
            report.health.insert(fetch.source, fetch.health);
            report.pairs.insert(fetch.source, fetch.pairs);
        }

        info!(
            sources = report.pairs.len(),
            pairs = report.pair_count(),
            "Fetched tickers"
        );
        report
    }

    /// Connectivity check that bypasses the cache.
    pub async fn probe(&self, source: Source) -> bool {
        for url in self.config.endpoints_for(source) {
            match self.fetcher.get_json(&url).await {
                Ok(_) => return true,
                Err(e) => debug!(source = %source, url = %url, error = %e, "Probe failed"),
            }
        }
        false
    }

    /// Probe every configured source concurrently.
    pub async fn probe_all(&self) -> BTreeMap<Source, bool> {
        let sources = self.config.sources.clone();
        let results = join_all(sources.iter().map(|&s| self.probe(s))).await;
        sources.into_iter().zip(results).collect()
    }
}
