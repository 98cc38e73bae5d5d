//! Raw ticker records to canonical pairs.

use crate::adapter::{extract_fields, TickerFields};
use crate::SymbolResolver;
use compact_str::CompactString;
use nicp_core::{pair_name, PairMap, PricePair, Source, USD_STABLE_SYMBOLS};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Minimum-activity policy for one source.
///
/// A pair passes when `volume > min_volume_usd`, or when
/// `volume > min_volume_with_liquidity_usd` and `liquidity > min_liquidity_usd`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActivityFilter {
    pub min_volume_usd: f64,
    pub min_volume_with_liquidity_usd: f64,
    pub min_liquidity_usd: f64,
}

impl Default for ActivityFilter {
    fn default() -> Self {
        Self {
            min_volume_usd: 500.0,
            min_volume_with_liquidity_usd: 50.0,
            min_liquidity_usd: 50_000.0,
        }
    }
}

impl ActivityFilter {
    pub fn passes(&self, volume_usd: f64, liquidity_usd: f64) -> bool {
        volume_usd > self.min_volume_usd
            || (volume_usd > self.min_volume_with_liquidity_usd
                && liquidity_usd > self.min_liquidity_usd)
    }
}

/// Normalizer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Filter used for sources without an override.
    pub activity: ActivityFilter,
    /// Per-source filter overrides.
    pub per_source: BTreeMap<Source, ActivityFilter>,
    /// Volume above which pairs with two unknown tokens are still admitted.
    pub high_volume_override_usd: f64,
    /// Reference ICP price used to estimate USD volume.
    pub icp_usd_price: f64,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            activity: ActivityFilter::default(),
            per_source: BTreeMap::new(),
            high_volume_override_usd: 10_000.0,
            icp_usd_price: 4.80,
        }
    }
}

impl NormalizerConfig {
    pub fn filter_for(&self, source: Source) -> ActivityFilter {
        self.per_source
            .get(&source)
            .copied()
            .unwrap_or(self.activity)
    }
}

/// Counters from one normalization pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeStats {
    pub admitted: usize,
    pub malformed: usize,
    pub no_price: usize,
    pub inactive: usize,
    pub unknown: usize,
}

/// Turns raw ticker records of any source into canonical [`PricePair`]s.
#[derive(Debug, Clone, Default)]
pub struct TickerNormalizer {
    resolver: SymbolResolver,
    config: NormalizerConfig,
}

impl TickerNormalizer {
    pub fn new(resolver: SymbolResolver, config: NormalizerConfig) -> Self {
        Self { resolver, config }
    }

    pub fn resolver(&self) -> &SymbolResolver {
        &self.resolver
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    /// Normalize every record; later duplicates of a pair name replace earlier ones.
    pub fn normalize(&self, records: &[Value], source: Source) -> PairMap {
        self.normalize_with_stats(records, source).0
    }

    pub fn normalize_with_stats(
        &self,
        records: &[Value],
        source: Source,
    ) -> (PairMap, NormalizeStats) {
        let filter = self.config.filter_for(source);
        let mut pairs = PairMap::new();
        let mut stats = NormalizeStats::default();

        for record in records {
            let fields = match extract_fields(source, record) {
                Ok(fields) => fields,
                Err(e) => {
                    warn!(source = %source, error = %e, "Skipping malformed ticker record");
                    stats.malformed += 1;
                    continue;
                }
            };

            if fields.last_price <= 0.0 {
                stats.no_price += 1;
                continue;
            }

            let base_known = self.resolver.is_known(&fields.base_id);
            let quote_known = self.resolver.is_known(&fields.quote_id);
            let base = self.resolver.resolve(&fields.base_id).to_uppercase();
            let quote = self.resolver.resolve(&fields.quote_id).to_uppercase();
            let name = pair_name(&base, &quote);

            let volume = self.estimate_volume_usd(&fields, &base, &quote);
            if !filter.passes(volume, fields.liquidity_usd) {
                debug!(source = %source, pair = %name, volume, "Dropping inactive pair");
                stats.inactive += 1;
                continue;
            }

            if !(base_known || quote_known || volume > self.config.high_volume_override_usd) {
                debug!(source = %source, pair = %name, "Dropping pair of unknown tokens");
                stats.unknown += 1;
                continue;
            }

            let pair = PricePair {
                pair_name: CompactString::from(name.as_str()),
                base: base.into(),
                quote: quote.into(),
                base_id: fields.base_id.as_str().into(),
                quote_id: fields.quote_id.as_str().into(),
                price: fields.last_price,
                volume_24h_usd: volume,
                liquidity_usd: fields.liquidity_usd,
                source,
                raw_payload: record.clone(),
            };
            pairs.insert(pair.pair_name.clone(), pair);
        }

        stats.admitted = pairs.len();
        debug!(
            source = %source,
            admitted = stats.admitted,
            malformed = stats.malformed,
            inactive = stats.inactive,
            unknown = stats.unknown,
            "Normalized tickers"
        );
        (pairs, stats)
    }

    /// Reported USD volume, else an anchor-priced estimate, else the smaller raw volume.
    fn estimate_volume_usd(&self, fields: &TickerFields, base: &str, quote: &str) -> f64 {
        if let Some(usd) = fields.volume_usd {
            return usd;
        }
        if let Some(anchor) = self.anchor_usd(quote) {
            return fields.quote_volume * anchor;
        }
        if let Some(anchor) = self.anchor_usd(base) {
            return fields.base_volume * anchor;
        }
        fields.base_volume.min(fields.quote_volume)
    }

    fn anchor_usd(&self, symbol: &str) -> Option<f64> {
        if symbol == nicp_core::ICP_SYMBOL {
            Some(self.config.icp_usd_price)
        } else if USD_STABLE_SYMBOLS.contains(&symbol) {
            Some(1.0)
        } else {
            None
        }
    }
}
