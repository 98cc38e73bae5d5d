//! Registered bot users.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub telegram_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub referral_code: String,
    pub referred_by: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Telegram identity fields captured at registration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewUser {
    pub telegram_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub referred_by: Option<String>,
}

/// `ICP` followed by the last four digits of the Telegram id.
pub fn referral_code(telegram_id: i64) -> String {
    format!("ICP{:04}", telegram_id.rem_euclid(10_000))
}
