//! Ticker collection from ICP decentralized exchanges.
//!
//! ## Architecture
//!
//! - `adapter/` - Source-specific ticker schemas and endpoint chains
//! - `normalizer` - Symbol resolution, volume estimation and activity filtering
//! - `client` - HTTP fetching with endpoint fallback, caching and fan-out
//! - `redemption` - WaterNeuron nICP redemption rate

pub mod adapter;
pub mod cache;
pub mod client;
pub mod error;
pub mod normalizer;
pub mod redemption;
pub mod resolver;

pub use adapter::{IcpSwapSchema, KongSwapSchema, TickerFields, TickerSchema};
pub use cache::*;
pub use client::*;
pub use error::*;
pub use normalizer::*;
pub use redemption::*;
pub use resolver::*;
