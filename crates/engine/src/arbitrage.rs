//! nICP redemption arbitrage scoring.
//!
//! Buying nICP on a DEX at `cost` ICP and redeeming it through WaterNeuron
//! after the dissolution delay yields `1 / redemption_rate` ICP per nICP.

use nicp_core::{PricePair, RateProvenance, RedemptionRate, ICP_SYMBOL, NICP_SYMBOL};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Minimum period profit, in percent, for an opportunity to be viable.
pub const VIABLE_PROFIT_PCT: f64 = 5.0;

/// Why an evaluation could not be computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArbitrageError {
    #[error("nICP price must be positive and finite")]
    InvalidPrice,
    #[error("redemption rate must be positive and finite")]
    InvalidRate,
    #[error("dissolution period must be at least one month")]
    InvalidPeriod,
}

/// Tier derived from the period profit percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recommendation {
    Poor,
    Moderate,
    Good,
    Great,
    Excellent,
}

impl Recommendation {
    pub fn from_profit_pct(pct: f64) -> Self {
        if pct >= 20.0 {
            Recommendation::Excellent
        } else if pct >= 15.0 {
            Recommendation::Great
        } else if pct >= 10.0 {
            Recommendation::Good
        } else if pct >= 5.0 {
            Recommendation::Moderate
        } else {
            Recommendation::Poor
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Recommendation::Excellent => "excellent",
            Recommendation::Great => "great",
            Recommendation::Good => "good",
            Recommendation::Moderate => "moderate",
            Recommendation::Poor => "poor",
        }
    }

    /// One-line text for chat output.
    pub fn describe(self) -> &'static str {
        match self {
            Recommendation::Excellent => "🚀 EXCELLENT - Very high arbitrage opportunity!",
            Recommendation::Great => "🔥 GREAT - Strong arbitrage opportunity!",
            Recommendation::Good => "✅ GOOD - Solid arbitrage opportunity",
            Recommendation::Moderate => "💡 MODERATE - Decent arbitrage opportunity",
            Recommendation::Poor => "❌ POOR - Not recommended",
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrageResult {
    /// ICP paid per nICP.
    pub cost_per_unit: f64,
    /// ICP received per nICP after dissolution.
    pub future_value_per_unit: f64,
    /// `(future - cost) / cost` over the dissolution period.
    pub profit_ratio: f64,
    /// Compounded yearly return as a ratio.
    pub annualized_return: f64,
    pub viable: bool,
    pub recommendation: Recommendation,
    pub redemption_rate: f64,
    pub dissolution_months: u32,
    /// `None` when the caller supplied a bare rate.
    pub rate_provenance: Option<RateProvenance>,
    pub error: Option<ArbitrageError>,
}

impl ArbitrageResult {
    pub fn profit_percentage(&self) -> f64 {
        self.profit_ratio * 100.0
    }

    pub fn annualized_percentage(&self) -> f64 {
        self.annualized_return * 100.0
    }

    pub fn profit_per_unit(&self) -> f64 {
        self.future_value_per_unit - self.cost_per_unit
    }

    fn invalid(price: f64, rate: f64, months: u32, error: ArbitrageError) -> Self {
        Self {
            cost_per_unit: price,
            future_value_per_unit: 0.0,
            profit_ratio: 0.0,
            annualized_return: 0.0,
            viable: false,
            recommendation: Recommendation::Poor,
            redemption_rate: rate,
            dissolution_months: months,
            rate_provenance: None,
            error: Some(error),
        }
    }
}

/// Score buying nICP at `nicp_price_in_icp` and redeeming after `dissolution_months`.
///
/// Never panics: invalid inputs produce a non-viable result carrying an error tag.
pub fn evaluate(
    nicp_price_in_icp: f64,
    redemption_rate: f64,
    dissolution_months: u32,
) -> ArbitrageResult {
    let (price, rate, months) = (nicp_price_in_icp, redemption_rate, dissolution_months);
    if !price.is_finite() || price <= 0.0 {
        return ArbitrageResult::invalid(price, rate, months, ArbitrageError::InvalidPrice);
    }
    if !rate.is_finite() || rate <= 0.0 {
        return ArbitrageResult::invalid(price, rate, months, ArbitrageError::InvalidRate);
    }
    if months == 0 {
        return ArbitrageResult::invalid(price, rate, months, ArbitrageError::InvalidPeriod);
    }

    let future_value = 1.0 / rate;
    let profit_ratio = (future_value - price) / price;
    let annualized_return = (1.0 + profit_ratio).powf(12.0 / f64::from(months)) - 1.0;
    let profit_pct = profit_ratio * 100.0;

    ArbitrageResult {
        cost_per_unit: price,
        future_value_per_unit: future_value,
        profit_ratio,
        annualized_return,
        viable: profit_pct > VIABLE_PROFIT_PCT,
        recommendation: Recommendation::from_profit_pct(profit_pct),
        redemption_rate: rate,
        dissolution_months: months,
        rate_provenance: None,
        error: None,
    }
}

/// [`evaluate`] with the rate's provenance carried into the result.
pub fn evaluate_with_rate(
    nicp_price_in_icp: f64,
    rate: &RedemptionRate,
    dissolution_months: u32,
) -> ArbitrageResult {
    ArbitrageResult {
        rate_provenance: Some(rate.provenance),
        ..evaluate(nicp_price_in_icp, rate.rate, dissolution_months)
    }
}

/// Price of one nICP in ICP, for pairs trading nICP against ICP in either orientation.
pub fn nicp_price_in_icp(pair: &PricePair) -> Option<f64> {
    if pair.base == NICP_SYMBOL && pair.quote == ICP_SYMBOL {
        Some(pair.price)
    } else if pair.base == ICP_SYMBOL && pair.quote == NICP_SYMBOL && pair.price > 0.0 {
        Some(1.0 / pair.price)
    } else {
        None
    }
}
