//! Canonical trading pair record.

use crate::Source;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One normalized trading pair observed on one source.
///
/// Every admitted pair has a strictly positive, finite `price`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePair {
    /// `BASE/QUOTE`, uppercase.
    pub pair_name: CompactString,
    pub base: CompactString,
    pub quote: CompactString,
    /// Raw canister id of the base token.
    pub base_id: CompactString,
    /// Raw canister id of the quote token.
    pub quote_id: CompactString,
    /// Quote units per one base unit.
    pub price: f64,
    /// Reported or estimated 24h volume in USD.
    pub volume_24h_usd: f64,
    /// Pool liquidity in USD, 0 when the source does not report it.
    pub liquidity_usd: f64,
    pub source: Source,
    /// Upstream record as received.
    pub raw_payload: serde_json::Value,
}

impl PricePair {
    /// Returns true when the pair trades the two given symbols in either orientation.
    pub fn trades(&self, a: &str, b: &str) -> bool {
        let (base, quote) = (self.base.as_str(), self.quote.as_str());
        (base.eq_ignore_ascii_case(a) && quote.eq_ignore_ascii_case(b))
            || (base.eq_ignore_ascii_case(b) && quote.eq_ignore_ascii_case(a))
    }
}

/// Pairs of one source keyed by pair name.
pub type PairMap = HashMap<CompactString, PricePair>;

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(base: &str, quote: &str) -> PricePair {
        PricePair {
            pair_name: crate::pair_name(base, quote).into(),
            base: base.to_uppercase().into(),
            quote: quote.to_uppercase().into(),
            base_id: "a".into(),
            quote_id: "b".into(),
            price: 1.0,
            volume_24h_usd: 0.0,
            liquidity_usd: 0.0,
            source: Source::IcpSwap,
            raw_payload: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_trades_either_orientation() {
        let p = pair("nICP", "ICP");
        assert!(p.trades("NICP", "ICP"));
        assert!(p.trades("icp", "nicp"));
        assert!(!p.trades("ICP", "CKUSDT"));
    }
}
