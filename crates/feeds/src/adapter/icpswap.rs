//! ICPSwap ticker schema.

use super::{number_field, string_field, TickerFields, TickerSchema};
use crate::FeedError;
use serde_json::Value;

/// ICPSwap `/tickers` records.
///
/// ```json
/// {"base_id": "...", "target_id": "...", "last_price": "0.979",
///  "base_volume_24H": "123", "target_volume_24H": "120",
///  "volume_usd_24H": "50000", "liquidity_in_usd": "200000"}
/// ```
pub struct IcpSwapSchema;

impl TickerSchema for IcpSwapSchema {
    fn endpoints() -> &'static [&'static str] {
        &[
            "https://uvevg-iyaaa-aaaak-ac27q-cai.raw.ic0.app/tickers",
            "https://uvevg-iyaaa-aaaak-ac27q-cai.raw.icp0.io/tickers",
        ]
    }

    fn extract(record: &Value) -> Result<TickerFields, FeedError> {
        let base_id = string_field(record, &["base_id", "base_currency"]).ok_or(
            FeedError::MalformedRecord {
                field: "base_id",
                reason: "missing".into(),
            },
        )?;
        let quote_id = string_field(record, &["target_id", "target_currency"]).ok_or(
            FeedError::MalformedRecord {
                field: "target_id",
                reason: "missing".into(),
            },
        )?;

        Ok(TickerFields {
            base_id,
            quote_id,
            last_price: number_field(record, &["last_price"])?.unwrap_or(0.0),
            base_volume: number_field(record, &["base_volume_24H", "base_volume"])?
                .unwrap_or(0.0),
            quote_volume: number_field(record, &["target_volume_24H", "target_volume"])?
                .unwrap_or(0.0),
            volume_usd: number_field(record, &["volume_usd_24H"])?,
            liquidity_usd: number_field(record, &["liquidity_in_usd"])?.unwrap_or(0.0),
        })
    }
}
