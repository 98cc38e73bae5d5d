//! WaterNeuron nICP redemption rate.

use crate::{FeedError, JsonFetcher, ResponseCache};
use nicp_core::{
    Clock, PoolReserves, RateProvenance, RedemptionRate, SystemClock, DEFAULT_REDEMPTION_RATE,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

const E8S: f64 = 100_000_000.0;
const CACHE_KEY: &str = "redemption_rate";

/// How the rate is obtained from the upstream figures.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RateDerivation {
    /// `nicp / icp` from the reported ICPSwap pool balances. This is the pool's
    /// price ratio, not the protocol's exchange rate, and is only plausible
    /// when the pool is balanced.
    PoolReserves,
    /// Operator-supplied constant. Reserves are still fetched as telemetry.
    Fixed { rate: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedemptionConfig {
    pub url: String,
    pub derivation: RateDerivation,
    pub cache_ttl_secs: i64,
    /// Derived rates outside `[min, max]` are rejected as implausible.
    pub plausible_min: f64,
    pub plausible_max: f64,
}

impl Default for RedemptionConfig {
    fn default() -> Self {
        Self {
            url: "https://wtn.ic.app/api/nicp".to_string(),
            derivation: RateDerivation::Fixed {
                rate: DEFAULT_REDEMPTION_RATE,
            },
            cache_ttl_secs: 120,
            plausible_min: 0.5,
            plausible_max: 1.0,
        }
    }
}

/// `/api/nicp` response, amounts in e8s.
#[derive(Debug, Deserialize)]
struct WaterNeuronResponse {
    icpswap: PoolBalances,
    total_supply: f64,
}

#[derive(Debug, Deserialize)]
struct PoolBalances {
    icp: f64,
    nicp: f64,
}

/// Decode the WaterNeuron payload into whole-token reserves.
pub fn parse_reserves(body: &serde_json::Value) -> Result<PoolReserves, FeedError> {
    let response: WaterNeuronResponse = serde_json::from_value(body.clone())
        .map_err(|e| FeedError::UnexpectedShape(e.to_string()))?;
    let reserves = PoolReserves {
        icp: response.icpswap.icp / E8S,
        nicp: response.icpswap.nicp / E8S,
        total_supply: response.total_supply / E8S,
    };
    if [reserves.icp, reserves.nicp, reserves.total_supply]
        .iter()
        .any(|v| !v.is_finite() || *v < 0.0)
    {
        return Err(FeedError::MalformedRecord {
            field: "icpswap",
            reason: "negative or non-finite balance".into(),
        });
    }
    Ok(reserves)
}

/// Fetches and caches the current redemption rate.
pub struct RedemptionClient {
    fetcher: Arc<dyn JsonFetcher>,
    cache: ResponseCache<RedemptionRate>,
    config: RedemptionConfig,
    clock: Arc<dyn Clock>,
}

impl RedemptionClient {
    pub fn new(fetcher: Arc<dyn JsonFetcher>, config: RedemptionConfig) -> Self {
        Self::with_clock(fetcher, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        fetcher: Arc<dyn JsonFetcher>,
        config: RedemptionConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache = ResponseCache::with_clock(
            chrono::Duration::seconds(config.cache_ttl_secs),
            clock.clone(),
        );
        Self {
            fetcher,
            cache,
            config,
            clock,
        }
    }

    /// Current rate. Never fails: falls back to the built-in default with
    /// [`RateProvenance::FallbackDefault`]. Fallbacks are cached for the TTL
    /// like any other result.
    pub async fn current_rate(&self) -> RedemptionRate {
        if let Some(cached) = self.cache.get(CACHE_KEY) {
            debug!(rate = cached.rate, "Using cached redemption rate");
            return cached;
        }

        let now = self.clock.now();
        let reserves = match self.fetch_reserves().await {
            Ok(reserves) => Some(reserves),
            Err(e) => {
                warn!(error = %e, "WaterNeuron rate unavailable");
                None
            }
        };

        let derived = match self.config.derivation {
            RateDerivation::Fixed { rate } if self.is_valid(rate) => Some(RedemptionRate {
                rate,
                provenance: RateProvenance::Configured,
                reserves,
                fetched_at: now,
            }),
            RateDerivation::Fixed { rate } => {
                warn!(rate, "Configured redemption rate is invalid");
                None
            }
            RateDerivation::PoolReserves => reserves.and_then(|r| {
                let rate = if r.icp > 0.0 { r.nicp / r.icp } else { 0.0 };
                if self.is_plausible(rate) {
                    Some(RedemptionRate {
                        rate,
                        provenance: RateProvenance::Live,
                        reserves: Some(r),
                        fetched_at: now,
                    })
                } else {
                    warn!(rate, "Reserve-derived redemption rate is implausible");
                    None
                }
            }),
        };

        let rate = match derived {
            Some(rate) => {
                info!(rate = rate.rate, provenance = %rate.provenance, "Redemption rate updated");
                rate
            }
            None => RedemptionRate {
                reserves,
                ..RedemptionRate::fallback(now)
            },
        };
        self.cache.insert(CACHE_KEY, rate.clone());
        rate
    }

    async fn fetch_reserves(&self) -> Result<PoolReserves, FeedError> {
        let body = self.fetcher.get_json(&self.config.url).await?;
        parse_reserves(&body)
    }

    fn is_valid(&self, rate: f64) -> bool {
        rate.is_finite() && rate > 0.0
    }

    fn is_plausible(&self, rate: f64) -> bool {
        self.is_valid(rate)
            && rate >= self.config.plausible_min
            && rate <= self.config.plausible_max
    }
}
