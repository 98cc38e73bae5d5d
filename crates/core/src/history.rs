//! Price observations.

use crate::Source;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One stored observation of a pair's price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceHistoryRecord {
    pub id: i64,
    pub pair: String,
    pub price: f64,
    pub volume_24h: Option<f64>,
    pub source: Source,
    /// Creation time, millisecond precision. Non-decreasing in insertion order.
    pub timestamp: DateTime<Utc>,
    pub raw_data: Option<String>,
}
