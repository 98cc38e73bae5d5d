//! Persistence, alert evaluation and Telegram delivery for the nICP tracker.
//!
//! This crate provides:
//! - SQLite storage for users, price history, alerts and subscriptions
//! - Price-change alert evaluation with per-user cooldown
//! - Telegram bot commands and channel notifications

pub mod config;
pub mod cooldown;
pub mod db;
pub mod dispatch;
pub mod evaluator;
pub mod message;
pub mod notifier;
pub mod telegram;

pub use config::AlertSettings;
pub use cooldown::{CooldownKey, CooldownTracker};
pub use db::{Database, DbError, DbStats};
pub use dispatch::{send_split, AlertDispatcher, DispatchError};
pub use evaluator::{AlertEvaluator, EvaluationSummary};
pub use notifier::{DeliveryReport, Notifier, NotifierError};
pub use telegram::{Command, TelegramBot, TelegramError};
