//! Cross-source arbitrage summary.

use crate::{evaluate_with_rate, nicp_price_in_icp, ArbitrageResult};
use compact_str::CompactString;
use nicp_core::{PairMap, RedemptionRate, Source, ICP_SYMBOL, NICP_SYMBOL};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// nICP opportunity on one source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Opportunity {
    pub source: Source,
    pub pair_name: CompactString,
    /// Price as quoted by the pair.
    pub last_price: f64,
    pub nicp_price_in_icp: f64,
    pub volume_24h_usd: f64,
    pub arbitrage: ArbitrageResult,
}

/// Every source's nICP opportunity plus the best viable one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArbitrageReport {
    pub opportunities: Vec<Opportunity>,
    /// Index into `opportunities`.
    pub best: Option<usize>,
    pub viable_count: usize,
    pub redemption: RedemptionRate,
}

impl ArbitrageReport {
    pub fn build(
        pairs_by_source: &BTreeMap<Source, PairMap>,
        redemption: &RedemptionRate,
        dissolution_months: u32,
    ) -> Self {
        let mut opportunities = Vec::new();

        for (&source, pairs) in pairs_by_source {
            let pair = pairs
                .values()
                .filter(|p| p.trades(NICP_SYMBOL, ICP_SYMBOL))
                .max_by(|a, b| a.volume_24h_usd.total_cmp(&b.volume_24h_usd));
            let Some(pair) = pair else {
                continue;
            };
            let Some(price) = nicp_price_in_icp(pair) else {
                continue;
            };

            let arbitrage = evaluate_with_rate(price, redemption, dissolution_months);
            debug!(
                source = %source,
                price,
                profit_pct = arbitrage.profit_percentage(),
                viable = arbitrage.viable,
                "Evaluated nICP arbitrage"
            );
            opportunities.push(Opportunity {
                source,
                pair_name: pair.pair_name.clone(),
                last_price: pair.price,
                nicp_price_in_icp: price,
                volume_24h_usd: pair.volume_24h_usd,
                arbitrage,
            });
        }

        let viable_count = opportunities.iter().filter(|o| o.arbitrage.viable).count();
        let best = opportunities
            .iter()
            .enumerate()
            .filter(|(_, o)| o.arbitrage.viable)
            .max_by(|(_, a), (_, b)| a.arbitrage.profit_ratio.total_cmp(&b.arbitrage.profit_ratio))
            .map(|(i, _)| i);

        Self {
            opportunities,
            best,
            viable_count,
            redemption: redemption.clone(),
        }
    }

    pub fn best_opportunity(&self) -> Option<&Opportunity> {
        self.best.and_then(|i| self.opportunities.get(i))
    }

    pub fn is_empty(&self) -> bool {
        self.opportunities.is_empty()
    }
}
