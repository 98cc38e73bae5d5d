//! KongSwap CoinGecko-format ticker schema.

use super::{number_field, string_field, TickerFields, TickerSchema};
use crate::FeedError;
use serde_json::Value;

/// KongSwap `/api/coingecko/tickers` records.
///
/// Canister ids are carried in `base_currency`/`target_currency`, with
/// `base_id`/`target_id` as an alternative spelling.
pub struct KongSwapSchema;

impl TickerSchema for KongSwapSchema {
    fn endpoints() -> &'static [&'static str] {
        &["https://api.kongswap.io/api/coingecko/tickers"]
    }

    fn extract(record: &Value) -> Result<TickerFields, FeedError> {
        let base_id = string_field(record, &["base_currency", "base_id"]).ok_or(
            FeedError::MalformedRecord {
                field: "base_currency",
                reason: "missing".into(),
            },
        )?;
        let quote_id = string_field(record, &["target_currency", "target_id"]).ok_or(
            FeedError::MalformedRecord {
                field: "target_currency",
                reason: "missing".into(),
            },
        )?;

        Ok(TickerFields {
            base_id,
            quote_id,
            last_price: number_field(record, &["last_price"])?.unwrap_or(0.0),
            base_volume: number_field(record, &["base_volume"])?.unwrap_or(0.0),
            quote_volume: number_field(record, &["target_volume"])?.unwrap_or(0.0),
            volume_usd: None,
            liquidity_usd: number_field(record, &["liquidity_in_usd"])?.unwrap_or(0.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_coingecko_record() {
        let record = json!({
            "ticker_id": "nICP_ICP",
            "base_currency": "buwm7-7yaaa-aaaar-qagva-cai",
            "target_currency": "ryjl3-tyaaa-aaaaa-aaaba-cai",
            "last_price": 0.981,
            "base_volume": "500",
            "target_volume": "490.5",
            "liquidity_in_usd": "75000"
        });
        let fields = KongSwapSchema::extract(&record).unwrap();
        assert_eq!(fields.base_id, "buwm7-7yaaa-aaaar-qagva-cai");
        assert_eq!(fields.quote_id, "ryjl3-tyaaa-aaaaa-aaaba-cai");
        assert_eq!(fields.last_price, 0.981);
        assert_eq!(fields.quote_volume, 490.5);
        assert_eq!(fields.volume_usd, None);
        assert_eq!(fields.liquidity_usd, 75000.0);
    }

    #[test]
    fn test_extract_alternate_id_fields() {
        let record = json!({"base_id": "x", "target_id": "y", "last_price": "1"});
        let fields = KongSwapSchema::extract(&record).unwrap();
        assert_eq!((fields.base_id.as_str(), fields.quote_id.as_str()), ("x", "y"));
    }

    #[test]
    fn test_negative_volume_is_malformed() {
        let record = json!({
            "base_currency": "x", "target_currency": "y",
            "last_price": "1", "base_volume": -5
        });
        assert!(matches!(
            KongSwapSchema::extract(&record),
            Err(FeedError::MalformedRecord { field: "base_volume", .. })
        ));
    }
}
