//! Application configuration.

use nicp_alerts::AlertSettings;
use nicp_feeds::{FetchConfig, NormalizerConfig, RedemptionConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("TELEGRAM_BOT_TOKEN is not set")]
    MissingToken,
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Bot API token. Required.
    #[serde(skip_serializing)]
    pub telegram_bot_token: String,
    /// Channel for market updates; updates are off when unset.
    pub telegram_channel_id: Option<i64>,
    pub database_url: String,
    /// Logging level.
    pub log_level: String,
    /// Months until redeemed nICP unlocks.
    pub dissolution_months: u32,
    pub intervals: IntervalSettings,
    pub fetch: FetchConfig,
    pub normalizer: NormalizerConfig,
    pub redemption: RedemptionConfig,
    pub alerts: AlertSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            telegram_bot_token: String::new(),
            telegram_channel_id: None,
            database_url: "sqlite:nicp_tracker.db".to_string(),
            log_level: "info".to_string(),
            dissolution_months: 6,
            intervals: IntervalSettings::default(),
            fetch: FetchConfig::default(),
            normalizer: NormalizerConfig::default(),
            redemption: RedemptionConfig::default(),
            alerts: AlertSettings::default(),
        }
    }
}

/// Scheduler periods in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalSettings {
    pub data_fetch_secs: u64,
    pub alert_check_secs: u64,
    pub market_update_secs: u64,
    pub health_check_secs: u64,
    pub cleanup_secs: u64,
}

impl Default for IntervalSettings {
    fn default() -> Self {
        Self {
            data_fetch_secs: 30,
            alert_check_secs: 60,
            market_update_secs: 30 * 60,
            health_check_secs: 5 * 60,
            cleanup_secs: 24 * 60 * 60,
        }
    }
}

impl IntervalSettings {
    pub fn data_fetch(&self) -> Duration {
        Duration::from_secs(self.data_fetch_secs.max(1))
    }

    pub fn alert_check(&self) -> Duration {
        Duration::from_secs(self.alert_check_secs.max(1))
    }

    pub fn market_update(&self) -> Duration {
        Duration::from_secs(self.market_update_secs.max(1))
    }

    pub fn health_check(&self) -> Duration {
        Duration::from_secs(self.health_check_secs.max(1))
    }

    pub fn cleanup(&self) -> Duration {
        Duration::from_secs(self.cleanup_secs.max(1))
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}

impl AppConfig {
    /// Load from an optional JSON file, then apply environment overrides.
    /// Call [`AppConfig::validate`] before starting the bot.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                serde_json::from_str(&text)?
            }
            None => Self::default(),
        };
        base.with_env(|key| std::env::var(key).ok())
    }

    /// Apply `TELEGRAM_*`, `DATABASE_URL`, interval and `LOG_LEVEL` overrides.
    pub fn with_env(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = get("TELEGRAM_BOT_TOKEN") {
            self.telegram_bot_token = token.trim().to_string();
        }
        if let Some(channel) = get("TELEGRAM_CHANNEL_ID") {
            self.telegram_channel_id = Some(parse_env("TELEGRAM_CHANNEL_ID", channel)?);
        }
        if let Some(url) = get("DATABASE_URL") {
            self.database_url = url;
        }
        if let Some(secs) = get("DATA_FETCH_INTERVAL") {
            self.intervals.data_fetch_secs = parse_env("DATA_FETCH_INTERVAL", secs)?;
        }
        if let Some(secs) = get("ALERT_CHECK_INTERVAL") {
            self.intervals.alert_check_secs = parse_env("ALERT_CHECK_INTERVAL", secs)?;
        }
        if let Some(months) = get("DISSOLUTION_MONTHS") {
            self.dissolution_months = parse_env("DISSOLUTION_MONTHS", months)?;
        }
        if let Some(level) = get("LOG_LEVEL") {
            self.log_level = level.trim().to_lowercase();
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.telegram_bot_token.is_empty() {
            return Err(ConfigError::MissingToken);
        }
        if self.dissolution_months == 0 {
            return Err(ConfigError::InvalidValue {
                key: "dissolution_months",
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}
