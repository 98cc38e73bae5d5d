//! Operator notifications for source connectivity.
//!
//! Sends Telegram messages to an admin chat when:
//! - a DEX ticker source stops answering
//! - a source recovers
//! - the redemption rate falls back to the built-in default
//! - the server starts or stops

use nicp_core::Source;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Status event types for notification.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    /// Every endpoint for the source failed its health probe
    SourceDown(Source),
    /// Source answered again after being down
    SourceRecovered(Source),
    /// Redemption rate could not be derived; default in use
    RedemptionFallback(f64),
    ServerStarted,
    ServerStopping,
}

impl StatusEvent {
    /// Event for a probe transition reported by the pipeline.
    pub fn from_transition(source: Source, up: bool) -> Self {
        if up {
            StatusEvent::SourceRecovered(source)
        } else {
            StatusEvent::SourceDown(source)
        }
    }
}

/// Configuration for status notifications.
#[derive(Debug, Clone)]
pub struct StatusNotifierConfig {
    /// Telegram bot token for status notifications
    pub bot_token: String,
    /// Telegram chat ID to send notifications to
    pub chat_id: String,
    pub notify_on_lifecycle: bool,
    pub notify_on_fallback: bool,
}

impl StatusNotifierConfig {
    /// Create config from environment variables.
    /// Uses TELEGRAM_STATUS_BOT_TOKEN and TELEGRAM_STATUS_CHAT_ID.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let bot_token = lookup("TELEGRAM_STATUS_BOT_TOKEN")?;
        let chat_id = lookup("TELEGRAM_STATUS_CHAT_ID")?;

        if bot_token.is_empty() || chat_id.is_empty() {
            return None;
        }

        Some(Self {
            bot_token,
            chat_id,
            notify_on_lifecycle: true,
            notify_on_fallback: true,
        })
    }
}

/// Sends Telegram messages for connectivity events.
pub struct StatusNotifier {
    config: StatusNotifierConfig,
    http_client: reqwest::Client,
    hostname: String,
}

impl StatusNotifier {
    pub fn new(config: StatusNotifierConfig) -> Self {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        Self {
            config,
            http_client: reqwest::Client::new(),
            hostname,
        }
    }

    /// Message body for an event, or `None` when that event kind is muted.
    pub fn render(&self, event: &StatusEvent) -> Option<String> {
        let body = match event {
            StatusEvent::SourceDown(source) => {
                format!("⚠️ <b>{}</b> ticker endpoints unreachable", source)
            }
            StatusEvent::SourceRecovered(source) => {
                format!("✅ <b>{}</b> ticker endpoints recovered", source)
            }
            StatusEvent::RedemptionFallback(rate) => {
                if !self.config.notify_on_fallback {
                    return None;
                }
                format!("🟡 Redemption rate unavailable, using default {rate:.7}")
            }
            StatusEvent::ServerStarted => {
                if !self.config.notify_on_lifecycle {
                    return None;
                }
                "🚀 nICP tracker started".to_string()
            }
            StatusEvent::ServerStopping => {
                if !self.config.notify_on_lifecycle {
                    return None;
                }
                "🛑 nICP tracker stopping".to_string()
            }
        };

        let now = chrono::Utc::now();
        Some(format!(
            "<b>{}</b>\n{}\n\n⏰ {}",
            self.hostname,
            body,
            now.format("%Y-%m-%d %H:%M:%S UTC")
        ))
    }

    pub async fn notify(&self, event: &StatusEvent) {
        let Some(message) = self.render(event) else {
            return;
        };
        if let Err(e) = self.send_telegram_message(&message).await {
            error!("Failed to send status notification: {}", e);
        }
    }

    /// Send a message via Telegram Bot API.
    async fn send_telegram_message(&self, message: &str) -> Result<(), reqwest::Error> {
        let url = format!(
            "https://api.telegram.org/bot{}/sendMessage",
            self.config.bot_token
        );

        let params = [
            ("chat_id", self.config.chat_id.as_str()),
            ("text", message),
            ("parse_mode", "HTML"),
            ("disable_web_page_preview", "true"),
        ];

        let response = self.http_client.post(&url).form(&params).send().await?;

        if !response.status().is_success() {
            warn!(
                "Telegram API returned non-success status: {}",
                response.status()
            );
        }

        Ok(())
    }
}

/// Cloneable sender for status events.
#[derive(Clone)]
pub struct StatusNotifierHandle {
    tx: mpsc::Sender<StatusEvent>,
}

impl StatusNotifierHandle {
    pub async fn send(&self, event: StatusEvent) {
        if let Err(e) = self.tx.send(event).await {
            warn!("Failed to send status event: {}", e);
        }
    }

    /// Non-blocking; drops the event when the queue is full.
    pub fn try_send(&self, event: StatusEvent) {
        if let Err(e) = self.tx.try_send(event) {
            warn!("Failed to send status event (try_send): {}", e);
        }
    }
}

/// Start the status notifier background task.
pub fn start_status_notifier(config: StatusNotifierConfig) -> StatusNotifierHandle {
    let (tx, mut rx) = mpsc::channel::<StatusEvent>(100);

    let notifier = Arc::new(StatusNotifier::new(config));

    tokio::spawn(async move {
        info!("Status notifier started");

        while let Some(event) = rx.recv().await {
            notifier.notify(&event).await;
        }

        info!("Status notifier stopped");
    });

    StatusNotifierHandle { tx }
}

/// Start a status notifier if TELEGRAM_STATUS_BOT_TOKEN and TELEGRAM_STATUS_CHAT_ID are set.
pub fn try_start_status_notifier() -> Option<StatusNotifierHandle> {
    match StatusNotifierConfig::from_env() {
        Some(config) => {
            info!(
                "Status notifier enabled (chat_id: {})",
                config.chat_id.chars().take(6).collect::<String>()
            );
            Some(start_status_notifier(config))
        }
        None => {
            info!("Status notifier disabled (TELEGRAM_STATUS_BOT_TOKEN or TELEGRAM_STATUS_CHAT_ID not set)");
            None
        }
    }
}
