//! User alert rules and dispatch log records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Condition an alert watches for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// Trailing 24h change at or above `+threshold` percent.
    PriceUp,
    /// Trailing 24h change at or below `-threshold` percent.
    PriceDown,
    /// Accepted and stored but never fires.
    VolumeSpike,
}

impl AlertType {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertType::PriceUp => "price_up",
            AlertType::PriceDown => "price_down",
            AlertType::VolumeSpike => "volume_spike",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown alert type: {0}")]
pub struct UnknownAlertType(pub String);

impl FromStr for AlertType {
    type Err = UnknownAlertType;

    /// Accepts the storage names plus the short forms `up`, `down` and `volume`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "price_up" | "up" => Ok(AlertType::PriceUp),
            "price_down" | "down" => Ok(AlertType::PriceDown),
            "volume_spike" | "volume" => Ok(AlertType::VolumeSpike),
            other => Err(UnknownAlertType(other.to_string())),
        }
    }
}

/// A user's alert rule. Deactivated, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAlert {
    pub id: i64,
    pub user_id: i64,
    pub pair: String,
    pub alert_type: AlertType,
    /// Percent, e.g. `5.0` for 5 %.
    pub threshold: f64,
    pub is_active: bool,
    pub last_triggered: Option<DateTime<Utc>>,
    pub trigger_count: i64,
    pub created_at: DateTime<Utc>,
}

/// Active alert joined with its owner's Telegram chat.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveAlert {
    pub alert: UserAlert,
    pub telegram_id: i64,
}

/// One dispatch attempt, delivered or not.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertLogEntry {
    pub user_id: i64,
    pub alert_id: Option<i64>,
    pub pair: String,
    pub message: String,
    pub price: f64,
    pub price_change: f64,
    pub delivered: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_type_parse() {
        assert_eq!("price_up".parse(), Ok(AlertType::PriceUp));
        assert_eq!("DOWN".parse(), Ok(AlertType::PriceDown));
        assert_eq!("volume".parse(), Ok(AlertType::VolumeSpike));
        assert!("sideways".parse::<AlertType>().is_err());
    }

    #[test]
    fn test_alert_type_storage_name_roundtrip() {
        for t in [AlertType::PriceUp, AlertType::PriceDown, AlertType::VolumeSpike] {
            assert_eq!(t.as_str().parse(), Ok(t));
        }
    }
}
