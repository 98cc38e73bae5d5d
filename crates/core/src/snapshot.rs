//! Latest market state shared between the scheduler and the bot.

use crate::{PairMap, PricePair, RedemptionRate, Source};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

/// Connectivity of one source as of its last fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceHealth {
    pub connected: bool,
    pub pair_count: usize,
    pub last_error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Result of the last completed price tick.
#[derive(Debug, Clone, Default)]
pub struct MarketSnapshot {
    pub pairs: BTreeMap<Source, PairMap>,
    pub redemption: Option<RedemptionRate>,
    pub health: BTreeMap<Source, SourceHealth>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Price of a pair as quoted by the source it was taken from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceQuote {
    pub price: f64,
    pub source: Source,
}

pub type SharedSnapshot = Arc<RwLock<MarketSnapshot>>;

pub fn shared_snapshot() -> SharedSnapshot {
    Arc::new(RwLock::new(MarketSnapshot::default()))
}

impl MarketSnapshot {
    pub fn is_empty(&self) -> bool {
        self.pairs.values().all(|p| p.is_empty())
    }

    pub fn pair_count(&self) -> usize {
        self.pairs.values().map(|p| p.len()).sum()
    }

    /// Every source's quote for `pair_name`, matched case-insensitively.
    pub fn find(&self, pair_name: &str) -> Vec<&PricePair> {
        let wanted = pair_name.to_uppercase();
        self.pairs
            .values()
            .filter_map(|pairs| pairs.get(wanted.as_str()))
            .collect()
    }

    /// One quote per pair name, taken from the source with the highest volume.
    pub fn current_quotes(&self) -> HashMap<String, SourceQuote> {
        let mut best: HashMap<String, &PricePair> = HashMap::new();
        for pair in self.pairs.values().flat_map(|p| p.values()) {
            best.entry(pair.pair_name.to_string())
                .and_modify(|cur| {
                    if pair.volume_24h_usd > cur.volume_24h_usd {
                        *cur = pair;
                    }
                })
                .or_insert(pair);
        }
        best.into_iter()
            .map(|(k, v)| {
                (
                    k,
                    SourceQuote {
                        price: v.price,
                        source: v.source,
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(name: &str, price: f64, volume: f64, source: Source) -> PricePair {
        let (base, quote) = name.split_once('/').unwrap();
        PricePair {
            pair_name: name.into(),
            base: base.into(),
            quote: quote.into(),
            base_id: "b".into(),
            quote_id: "q".into(),
            price,
            volume_24h_usd: volume,
            liquidity_usd: 0.0,
            source,
            raw_payload: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_current_quotes_prefer_higher_volume() {
        let mut snapshot = MarketSnapshot::default();
        let mut icpswap = PairMap::new();
        icpswap.insert("NICP/ICP".into(), pair("NICP/ICP", 0.97, 1_000.0, Source::IcpSwap));
        let mut kong = PairMap::new();
        kong.insert("NICP/ICP".into(), pair("NICP/ICP", 0.98, 5_000.0, Source::KongSwap));
        snapshot.pairs.insert(Source::IcpSwap, icpswap);
        snapshot.pairs.insert(Source::KongSwap, kong);

        assert_eq!(
            snapshot.current_quotes()["NICP/ICP"],
            SourceQuote {
                price: 0.98,
                source: Source::KongSwap
            }
        );
        assert_eq!(snapshot.find("nicp/icp").len(), 2);
        assert_eq!(snapshot.pair_count(), 2);
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = MarketSnapshot::default();
        assert!(snapshot.is_empty());
        assert!(snapshot.current_quotes().is_empty());
    }
}
