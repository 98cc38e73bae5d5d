//! Source adapter trait and implementations.
//!
//! Each DEX publishes tickers in its own JSON schema.
//! Adapters pull the fields the normalizer needs out of one raw record.

mod icpswap;
mod kongswap;

pub use icpswap::IcpSwapSchema;
pub use kongswap::KongSwapSchema;

use crate::FeedError;
use nicp_core::Source;
use serde_json::Value;

/// Fields common to every ticker schema.
#[derive(Debug, Clone, PartialEq)]
pub struct TickerFields {
    pub base_id: String,
    pub quote_id: String,
    /// 0 when absent.
    pub last_price: f64,
    pub base_volume: f64,
    pub quote_volume: f64,
    /// Reported USD volume, if the source publishes one.
    pub volume_usd: Option<f64>,
    /// 0 when absent.
    pub liquidity_usd: f64,
}

/// Trait for source-specific ticker schemas.
pub trait TickerSchema {
    /// Ticker endpoints in fallback order.
    fn endpoints() -> &'static [&'static str];

    /// Extract the common fields from one raw record.
    fn extract(record: &Value) -> Result<TickerFields, FeedError>;
}

/// Default endpoint chain for a source.
pub fn default_endpoints(source: Source) -> &'static [&'static str] {
    match source {
        Source::IcpSwap => IcpSwapSchema::endpoints(),
        Source::KongSwap => KongSwapSchema::endpoints(),
    }
}

/// Dispatch extraction to the schema of `source`.
pub fn extract_fields(source: Source, record: &Value) -> Result<TickerFields, FeedError> {
    match source {
        Source::IcpSwap => IcpSwapSchema::extract(record),
        Source::KongSwap => KongSwapSchema::extract(record),
    }
}

/// Unwraps a ticker response into its record list.
///
/// Accepts a bare array or an object carrying the array under `tickers` or `data`.
pub fn ticker_records(body: &Value) -> Result<&[Value], FeedError> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Object(map) => ["tickers", "data"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_array))
            .map(Vec::as_slice)
            .ok_or_else(|| FeedError::UnexpectedShape("object without ticker array".into())),
        other => Err(FeedError::UnexpectedShape(format!(
            "expected array, got {}",
            json_kind(other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// First non-empty string among `fields`.
pub(crate) fn string_field(record: &Value, fields: &[&str]) -> Option<String> {
    fields.iter().find_map(|field| {
        record
            .get(*field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

/// Value of the first present field among `fields`, as a non-negative finite number.
///
/// Numbers may arrive as JSON numbers or numeric strings. Absent, null and
/// empty-string fields yield `None`.
pub(crate) fn number_field(
    record: &Value,
    fields: &[&'static str],
) -> Result<Option<f64>, FeedError> {
    for &field in fields {
        let parsed = match record.get(field) {
            None | Some(Value::Null) => continue,
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) if s.trim().is_empty() => continue,
            Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
            Some(other) => {
                return Err(FeedError::MalformedRecord {
                    field,
                    reason: format!("expected number, got {}", json_kind(other)),
                })
            }
        };
        return match parsed {
            Some(v) if !v.is_finite() => Err(FeedError::MalformedRecord {
                field,
                reason: "not finite".into(),
            }),
            Some(v) if v < 0.0 => Err(FeedError::MalformedRecord {
                field,
                reason: format!("negative value {v}"),
            }),
            Some(v) => Ok(Some(v)),
            None => Err(FeedError::MalformedRecord {
                field,
                reason: "not a number".into(),
            }),
        };
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_number_field_accepts_strings_and_numbers() {
        let record = json!({"a": "1.5", "b": 2, "c": "", "d": null});
        assert_eq!(number_field(&record, &["a"]).unwrap(), Some(1.5));
        assert_eq!(number_field(&record, &["b"]).unwrap(), Some(2.0));
        assert_eq!(number_field(&record, &["c", "d", "missing"]).unwrap(), None);
        assert_eq!(number_field(&record, &["missing", "b"]).unwrap(), Some(2.0));
    }

    #[test]
    fn test_number_field_rejects_garbage() {
        let record = json!({"neg": "-3", "text": "abc", "obj": {}, "inf": "inf"});
        for field in ["neg", "text", "obj", "inf"] {
            let err = number_field(&record, &[field]).unwrap_err();
            assert!(matches!(err, FeedError::MalformedRecord { .. }), "{field}");
        }
    }

    #[test]
    fn test_ticker_records_shapes() {
        let bare = json!([{"x": 1}]);
        assert_eq!(ticker_records(&bare).unwrap().len(), 1);

        let wrapped = json!({"tickers": [{"x": 1}, {"x": 2}]});
        assert_eq!(ticker_records(&wrapped).unwrap().len(), 2);

        let data = json!({"data": []});
        assert!(ticker_records(&data).unwrap().is_empty());

        assert!(ticker_records(&json!({"status": "ok"})).is_err());
        assert!(ticker_records(&json!("nope")).is_err());
    }
}
