//! Alert and notification settings.

use chrono::Duration;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    /// Minimum gap between notifications for the same user, pair and alert type.
    pub cooldown_secs: i64,
    /// Trailing window for price_up / price_down.
    pub change_window_hours: i64,
    /// Days of price history to keep.
    pub history_retention_days: i64,
    /// Broadcast a channel notice when a pair moves this much within `significant_move_hours`.
    pub significant_move_pct: f64,
    pub significant_move_hours: i64,
    /// Pairs listed in the channel market update.
    pub market_update_pairs: usize,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            cooldown_secs: 300,
            change_window_hours: 24,
            history_retention_days: 30,
            significant_move_pct: 10.0,
            significant_move_hours: 1,
            market_update_pairs: 10,
        }
    }
}

impl AlertSettings {
    pub fn cooldown(&self) -> Duration {
        Duration::seconds(self.cooldown_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let settings = AlertSettings::default();
        assert_eq!(settings.cooldown(), Duration::seconds(300));
        assert_eq!(settings.history_retention_days, 30);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: AlertSettings = serde_json::from_str(r#"{"cooldown_secs": 60}"#).unwrap();
        assert_eq!(settings.cooldown_secs, 60);
        assert_eq!(settings.change_window_hours, 24);
    }
}
