//! Telegram bot handlers.

use crate::config::AlertSettings;
use crate::db::{Database, DbError};
use crate::dispatch::{AlertDispatcher, DispatchError};
use crate::message::{
    format_arbitrage_report, format_health, format_pair_quotes, format_price_list, split_message,
    MESSAGE_LIMIT, NO_DATA_REPLY,
};
use async_trait::async_trait;
use nicp_core::{AlertType, MarketSnapshot, NewUser, RedemptionRate, SharedSnapshot};
use nicp_engine::ArbitrageReport;
use std::fmt::Write;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use teloxide::utils::command::BotCommands;
use teloxide::utils::html::escape;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum TelegramError {
    #[error("Telegram API error: {0}")]
    Api(#[from] teloxide::RequestError),
    #[error("Database error: {0}")]
    Db(#[from] DbError),
}

/// Bot commands.
#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "Register and show your referral code")]
    Start(String),
    #[command(description = "Show help")]
    Help,
    #[command(description = "Current prices. Usage: /price or /price NICP/ICP")]
    Price(String),
    #[command(description = "nICP discount opportunities")]
    Discount,
    #[command(description = "Follow a pair. Usage: /subscribe NICP/ICP")]
    Subscribe(String),
    #[command(description = "Stop following a pair. Usage: /unsubscribe NICP/ICP")]
    Unsubscribe(String),
    #[command(description = "List followed pairs")]
    Subscriptions,
    #[command(description = "Create an alert. Usage: /alert NICP/ICP up 5")]
    Alert(String),
    #[command(description = "List your alerts")]
    Alerts,
    #[command(description = "Delete an alert. Usage: /delalert 3")]
    Delalert(String),
    #[command(description = "Your usage and bot statistics")]
    Stats,
    #[command(description = "Per-source connectivity")]
    Status,
}

/// `nicp/icp` → `NICP/ICP`; `None` unless exactly two non-empty halves.
pub fn normalize_pair(raw: &str) -> Option<String> {
    let (base, quote) = raw.trim().split_once('/')?;
    let (base, quote) = (base.trim(), quote.trim());
    if base.is_empty() || quote.is_empty() || quote.contains('/') {
        return None;
    }
    Some(nicp_core::pair_name(base, quote))
}

/// Parse `PAIR TYPE THRESHOLD` for `/alert`.
pub fn parse_alert_args(args: &str) -> Result<(String, AlertType, f64), String> {
    let parts: Vec<&str> = args.split_whitespace().collect();
    let [pair, kind, threshold] = parts.as_slice() else {
        return Err("Usage: /alert PAIR up|down|volume THRESHOLD\nExample: /alert NICP/ICP up 5".into());
    };
    let pair = normalize_pair(pair).ok_or_else(|| format!("Invalid pair: {pair}"))?;
    let alert_type = kind.parse::<AlertType>().map_err(|e| e.to_string())?;
    let threshold = threshold
        .trim_end_matches('%')
        .parse::<f64>()
        .ok()
        .filter(|t| t.is_finite() && *t > 0.0 && *t <= 1000.0)
        .ok_or_else(|| "Threshold must be a percentage between 0 and 1000".to_string())?;
    Ok((pair, alert_type, threshold))
}

/// Referral code from a `/start ref_ICP1234` deep link.
fn referral_payload(payload: &str) -> Option<String> {
    let code = payload.trim();
    let code = code.strip_prefix("ref_").unwrap_or(code);
    (code.starts_with("ICP") && code.len() == 7).then(|| code.to_string())
}

/// Telegram bot wrapper.
pub struct TelegramBot {
    bot: Bot,
    db: Database,
    snapshot: SharedSnapshot,
    dissolution_months: u32,
    change_window_hours: i64,
}

impl TelegramBot {
    /// Create a new bot with the given token.
    pub fn new(
        token: &str,
        db: Database,
        snapshot: SharedSnapshot,
        dissolution_months: u32,
    ) -> Self {
        Self {
            bot: Bot::new(token),
            db,
            snapshot,
            dissolution_months,
            change_window_hours: AlertSettings::default().change_window_hours,
        }
    }

    /// Use the alert evaluator's trailing window for `/price` changes.
    pub fn with_settings(mut self, settings: &AlertSettings) -> Self {
        self.change_window_hours = settings.change_window_hours;
        self
    }

    /// Get the underlying bot for sending messages.
    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    fn read_snapshot<T>(&self, f: impl FnOnce(&MarketSnapshot) -> T) -> T {
        match self.snapshot.read() {
            Ok(guard) => f(&guard),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    /// Trailing change for `pair`, measured on the source its current quote comes from.
    async fn pair_change(&self, pair: &str) -> Result<Option<f64>, DbError> {
        let source = self.read_snapshot(|s| s.current_quotes().get(pair).map(|q| q.source));
        match source {
            Some(source) => {
                self.db
                    .percent_change(pair, source, self.change_window_hours)
                    .await
            }
            None => Ok(None),
        }
    }

    /// Run the bot command handler.
    pub async fn run(self: Arc<Self>) {
        let bot = self.bot.clone();
        let handler = Update::filter_message().filter_command::<Command>().endpoint(
            move |bot: Bot, msg: Message, cmd: Command| {
                let this = Arc::clone(&self);
                async move { this.handle_command(bot, msg, cmd).await }
            },
        );

        Dispatcher::builder(bot, handler)
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;
    }

    async fn reply(&self, bot: &Bot, chat: ChatId, text: &str) -> Result<(), TelegramError> {
        for part in split_message(text, MESSAGE_LIMIT) {
            bot.send_message(chat, part)
                .parse_mode(ParseMode::Html)
                .await?;
        }
        Ok(())
    }

    /// Internal user id, registering the chat first if needed.
    async fn user_id(&self, msg: &Message) -> Result<i64, TelegramError> {
        let telegram_id = msg.chat.id.0;
        match self.db.require_user(telegram_id).await {
            Ok(id) => {
                self.db.touch_user(telegram_id).await?;
                Ok(id)
            }
            Err(DbError::UserNotFound(_)) => {
                Ok(self.db.register_user(&new_user(msg, None)).await?.id)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn handle_command(
        &self,
        bot: Bot,
        msg: Message,
        cmd: Command,
    ) -> Result<(), TelegramError> {
        let chat = msg.chat.id;
        info!(chat_id = chat.0, command = ?cmd, "Command received");

        match cmd {
            Command::Start(payload) => {
                let profile = self
                    .db
                    .register_user(&new_user(&msg, referral_payload(&payload)))
                    .await?;
                let text = format!(
                    "🚀 <b>Welcome to the nICP Discount Tracker!</b>\n\n\
                     nICP is staked ICP that can be redeemed after {} months. When it trades \
                     below its redemption value on a DEX, buying and redeeming earns the difference.\n\n\
                     🎁 Your referral code: <code>{}</code>\n\n\
                     Try /discount for live opportunities or /help for every command.",
                    self.dissolution_months,
                    escape(&profile.referral_code)
                );
                self.reply(&bot, chat, &text).await?;
            }

            Command::Help => {
                bot.send_message(chat, Command::descriptions().to_string())
                    .await?;
            }

            Command::Price(arg) => {
                let arg = arg.trim();
                if arg.is_empty() {
                    let text = self.read_snapshot(|s| {
                        (!s.is_empty()).then(|| format_price_list(s, 10))
                    });
                    self.reply(&bot, chat, text.as_deref().unwrap_or(NO_DATA_REPLY))
                        .await?;
                } else {
                    let Some(pair) = normalize_pair(arg) else {
                        self.reply(&bot, chat, "Usage: /price NICP/ICP").await?;
                        return Ok(());
                    };
                    let change = self.pair_change(&pair).await?;
                    let text = self.read_snapshot(|s| {
                        let quotes = s.find(&pair);
                        (!quotes.is_empty()).then(|| {
                            format_pair_quotes(&pair, &quotes, change, self.change_window_hours)
                        })
                    });
                    match text {
                        Some(text) => self.reply(&bot, chat, &text).await?,
                        None => {
                            let text = format!(
                                "No data for {}. It may be inactive or not yet fetched; try again shortly.",
                                escape(&pair)
                            );
                            self.reply(&bot, chat, &text).await?;
                        }
                    }
                }
            }

            Command::Discount => {
                let months = self.dissolution_months;
                let text = self.read_snapshot(|s| {
                    let rate = s
                        .redemption
                        .clone()
                        .unwrap_or_else(|| RedemptionRate::fallback(chrono::Utc::now()));
                    let report = ArbitrageReport::build(&s.pairs, &rate, months);
                    (!report.is_empty()).then(|| format_arbitrage_report(&report, months))
                });
                self.reply(&bot, chat, text.as_deref().unwrap_or(NO_DATA_REPLY))
                    .await?;
            }

            Command::Subscribe(arg) => {
                let Some(pair) = normalize_pair(&arg) else {
                    self.reply(&bot, chat, "Usage: /subscribe NICP/ICP").await?;
                    return Ok(());
                };
                let user_id = self.user_id(&msg).await?;
                self.db.subscribe(user_id, &pair).await?;
                self.reply(&bot, chat, &format!("✅ Subscribed to {}", escape(&pair)))
                    .await?;
            }

            Command::Unsubscribe(arg) => {
                let Some(pair) = normalize_pair(&arg) else {
                    self.reply(&bot, chat, "Usage: /unsubscribe NICP/ICP").await?;
                    return Ok(());
                };
                let user_id = self.user_id(&msg).await?;
                let text = if self.db.unsubscribe(user_id, &pair).await? {
                    format!("Unsubscribed from {}", escape(&pair))
                } else {
                    format!("You are not subscribed to {}", escape(&pair))
                };
                self.reply(&bot, chat, &text).await?;
            }

            Command::Subscriptions => {
                let user_id = self.user_id(&msg).await?;
                let pairs = self.db.get_subscriptions(user_id).await?;
                let text = if pairs.is_empty() {
                    "No subscriptions. Use /subscribe NICP/ICP".to_string()
                } else {
                    format!("📋 <b>Subscriptions</b>\n{}", escape(&pairs.join("\n")))
                };
                self.reply(&bot, chat, &text).await?;
            }

            Command::Alert(args) => match parse_alert_args(&args) {
                Ok((pair, alert_type, threshold)) => {
                    let user_id = self.user_id(&msg).await?;
                    let id = self
                        .db
                        .create_alert(user_id, &pair, alert_type, threshold)
                        .await?;
                    let mut text = format!(
                        "🔔 Alert #{} created: {} {} {}%",
                        id,
                        escape(&pair),
                        alert_type,
                        threshold
                    );
                    if alert_type == AlertType::VolumeSpike {
                        text.push_str("\n⚠️ Volume alerts are stored but not evaluated yet.");
                    }
                    self.reply(&bot, chat, &text).await?;
                }
                Err(usage) => self.reply(&bot, chat, &escape(&usage)).await?,
            },

            Command::Alerts => {
                let user_id = self.user_id(&msg).await?;
                let alerts = self.db.get_user_alerts(user_id).await?;
                let text = if alerts.is_empty() {
                    "No active alerts. Use /alert NICP/ICP up 5".to_string()
                } else {
                    let mut text = String::from("🔔 <b>Your alerts</b>\n");
                    for alert in &alerts {
                        let _ = writeln!(
                            text,
                            "#{} {} {} {}% (fired {}x)",
                            alert.id,
                            escape(&alert.pair),
                            alert.alert_type,
                            alert.threshold,
                            alert.trigger_count
                        );
                    }
                    text
                };
                self.reply(&bot, chat, &text).await?;
            }

            Command::Delalert(arg) => {
                let Ok(alert_id) = arg.trim().trim_start_matches('#').parse::<i64>() else {
                    self.reply(&bot, chat, "Usage: /delalert ID").await?;
                    return Ok(());
                };
                let user_id = self.user_id(&msg).await?;
                let text = if self.db.deactivate_alert(user_id, alert_id).await? {
                    format!("🗑 Alert #{} deleted", alert_id)
                } else {
                    format!("No active alert #{}", alert_id)
                };
                self.reply(&bot, chat, &text).await?;
            }

            Command::Stats => {
                let user_id = self.user_id(&msg).await?;
                let alerts = self.db.get_user_alerts(user_id).await?.len();
                let subscriptions = self.db.get_subscriptions(user_id).await?.len();
                let stats = self.db.stats().await?;
                let referral = self
                    .db
                    .get_user(chat.0)
                    .await?
                    .map(|p| p.referral_code)
                    .unwrap_or_default();
                let text = format!(
                    "📊 <b>Your stats</b>\n\
                     Alerts: {}\nSubscriptions: {}\nReferral code: <code>{}</code>\n\n\
                     <b>Bot</b>\n\
                     Users: {}\nActive alerts: {}\nPrice records: {}\nAlerts delivered (24h): {}",
                    alerts,
                    subscriptions,
                    escape(&referral),
                    stats.users,
                    stats.active_alerts,
                    stats.price_records,
                    stats.alerts_delivered_24h
                );
                self.reply(&bot, chat, &text).await?;
            }

            Command::Status => {
                let text = self.read_snapshot(format_health);
                self.reply(&bot, chat, &text).await?;
            }
        }

        Ok(())
    }
}

fn new_user(msg: &Message, referred_by: Option<String>) -> NewUser {
    let from = msg.from.as_ref();
    NewUser {
        telegram_id: msg.chat.id.0,
        username: from.and_then(|u| u.username.clone()),
        first_name: from.map(|u| u.first_name.clone()),
        last_name: from.and_then(|u| u.last_name.clone()),
        referred_by,
    }
}

#[async_trait]
impl AlertDispatcher for TelegramBot {
    async fn send_html(&self, chat_id: i64, html: &str) -> Result<(), DispatchError> {
        if chat_id == 0 {
            return Err(DispatchError::InvalidChat(chat_id.to_string()));
        }
        if let Err(e) = self
            .bot
            .send_message(ChatId(chat_id), html)
            .parse_mode(ParseMode::Html)
            .await
        {
            warn!(chat_id, error = %e, "Telegram send failed");
            return Err(e.into());
        }
        Ok(())
    }
}
