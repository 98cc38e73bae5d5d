//! nICP arbitrage evaluation.
//!
//! Scores the buy-on-DEX, redeem-through-WaterNeuron trade and summarizes it
//! across sources.

pub mod arbitrage;
pub mod report;

pub use arbitrage::*;
pub use report::*;
