//! nICP redemption rate with provenance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Used only when no live or configured rate is available.
pub const DEFAULT_REDEMPTION_RATE: f64 = 0.9001103;

/// Standard nICP dissolution delay.
pub const DEFAULT_DISSOLUTION_MONTHS: u32 = 6;

/// Where a redemption rate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateProvenance {
    /// Derived from a successful upstream fetch.
    Live,
    /// Operator-configured constant.
    Configured,
    /// Built-in default after a failed or implausible fetch.
    FallbackDefault,
}

impl RateProvenance {
    pub fn as_str(self) -> &'static str {
        match self {
            RateProvenance::Live => "live",
            RateProvenance::Configured => "configured",
            RateProvenance::FallbackDefault => "fallback-default",
        }
    }

    #[inline]
    pub fn is_fallback(self) -> bool {
        matches!(self, RateProvenance::FallbackDefault)
    }
}

impl fmt::Display for RateProvenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ICPSwap pool balances reported by WaterNeuron, in whole tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoolReserves {
    pub icp: f64,
    pub nicp: f64,
    pub total_supply: f64,
}

/// nICP received per ICP staked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedemptionRate {
    pub rate: f64,
    pub provenance: RateProvenance,
    pub reserves: Option<PoolReserves>,
    pub fetched_at: DateTime<Utc>,
}

impl RedemptionRate {
    pub fn fallback(at: DateTime<Utc>) -> Self {
        Self {
            rate: DEFAULT_REDEMPTION_RATE,
            provenance: RateProvenance::FallbackDefault,
            reserves: None,
            fetched_at: at,
        }
    }
}
