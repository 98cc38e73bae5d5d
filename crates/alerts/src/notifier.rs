//! Channel broadcasts, subscriber digests and history retention.

use crate::config::AlertSettings;
use crate::cooldown::{CooldownKey, CooldownTracker};
use crate::db::{Database, DbError};
use crate::dispatch::{send_split, AlertDispatcher};
use crate::message::{
    format_arbitrage_report, format_market_update, format_significant_move, MarketLine,
};
use nicp_core::{
    AlertType, Clock, MarketSnapshot, PricePair, RedemptionRate, SourceQuote, SystemClock,
};
use nicp_engine::ArbitrageReport;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Error, Debug)]
pub enum NotifierError {
    #[error("Database error: {0}")]
    Db(#[from] DbError),
}

/// Outcome of a fan-out send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub sent: usize,
    pub failed: usize,
}

/// Sends market updates to the channel and digests to subscribers.
pub struct Notifier {
    db: Database,
    dispatcher: Arc<dyn AlertDispatcher>,
    channel_id: Option<i64>,
    settings: AlertSettings,
    dissolution_months: u32,
    moves: CooldownTracker,
    clock: Arc<dyn Clock>,
}

impl Notifier {
    pub fn new(
        db: Database,
        dispatcher: Arc<dyn AlertDispatcher>,
        channel_id: Option<i64>,
        settings: AlertSettings,
        dissolution_months: u32,
    ) -> Self {
        Self::with_clock(
            db,
            dispatcher,
            channel_id,
            settings,
            dissolution_months,
            Arc::new(SystemClock),
        )
    }

    pub fn with_clock(
        db: Database,
        dispatcher: Arc<dyn AlertDispatcher>,
        channel_id: Option<i64>,
        settings: AlertSettings,
        dissolution_months: u32,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let window = chrono::Duration::hours(settings.significant_move_hours);
        Self {
            db,
            dispatcher,
            channel_id,
            settings,
            dissolution_months,
            moves: CooldownTracker::with_clock(window, clock.clone()),
            clock,
        }
    }

    pub fn has_channel(&self) -> bool {
        self.channel_id.is_some()
    }

    async fn deliver(&self, chat_id: i64, text: &str, report: &mut DeliveryReport) {
        match send_split(self.dispatcher.as_ref(), chat_id, text).await {
            Ok(_) => report.sent += 1,
            Err(e) => {
                error!(chat_id, error = %e, "Failed to deliver notification");
                report.failed += 1;
            }
        }
    }

    /// Highest-volume quote per pair, busiest first.
    fn top_pairs(snapshot: &MarketSnapshot, limit: usize) -> Vec<&PricePair> {
        let mut best: HashMap<&str, &PricePair> = HashMap::new();
        for pair in snapshot.pairs.values().flat_map(|p| p.values()) {
            let entry = best.entry(pair.pair_name.as_str()).or_insert(pair);
            if pair.volume_24h_usd > entry.volume_24h_usd {
                *entry = pair;
            }
        }
        let mut pairs: Vec<&PricePair> = best.into_values().collect();
        pairs.sort_by(|a, b| {
            b.volume_24h_usd
                .total_cmp(&a.volume_24h_usd)
                .then_with(|| a.pair_name.cmp(&b.pair_name))
        });
        pairs.truncate(limit);
        pairs
    }

    async fn market_lines(&self, pairs: &[&PricePair]) -> Result<Vec<MarketLine>, NotifierError> {
        let mut lines = Vec::with_capacity(pairs.len());
        for pair in pairs {
            let change = self
                .db
                .percent_change(&pair.pair_name, pair.source, self.settings.change_window_hours)
                .await?;
            lines.push(MarketLine {
                pair: pair.pair_name.to_string(),
                price: pair.price,
                volume_24h_usd: pair.volume_24h_usd,
                change,
            });
        }
        Ok(lines)
    }

    /// Post the periodic market update and arbitrage report to the channel.
    pub async fn send_market_update(
        &self,
        snapshot: &MarketSnapshot,
    ) -> Result<DeliveryReport, NotifierError> {
        let mut report = DeliveryReport::default();
        let Some(channel) = self.channel_id else {
            return Ok(report);
        };
        if snapshot.is_empty() {
            info!("No price data for market update");
            return Ok(report);
        }

        let top = Self::top_pairs(snapshot, self.settings.market_update_pairs);
        let lines = self.market_lines(&top).await?;
        let mut text = format_market_update(&lines, self.clock.now());

        let rate = snapshot
            .redemption
            .clone()
            .unwrap_or_else(|| RedemptionRate::fallback(self.clock.now()));
        let arbitrage = ArbitrageReport::build(&snapshot.pairs, &rate, self.dissolution_months);
        if !arbitrage.is_empty() {
            text.push_str("\n\n");
            text.push_str(&format_arbitrage_report(&arbitrage, self.dissolution_months));
        }

        self.deliver(channel, &text, &mut report).await;
        info!(sent = report.sent, "Market update posted");
        Ok(report)
    }

    /// Send each subscriber one message covering their subscribed pairs.
    pub async fn send_subscriber_digests(
        &self,
        snapshot: &MarketSnapshot,
    ) -> Result<DeliveryReport, NotifierError> {
        let mut report = DeliveryReport::default();
        let subscriptions = self.db.active_subscriptions().await?;
        if subscriptions.is_empty() || snapshot.is_empty() {
            return Ok(report);
        }

        let mut by_chat: BTreeMap<i64, Vec<&PricePair>> = BTreeMap::new();
        for (chat_id, pair) in &subscriptions {
            let best = snapshot
                .find(pair)
                .into_iter()
                .max_by(|a, b| a.volume_24h_usd.total_cmp(&b.volume_24h_usd));
            match best {
                Some(quote) => by_chat.entry(*chat_id).or_default().push(quote),
                None => debug!(chat_id, pair = %pair, "No data for subscribed pair"),
            }
        }

        for (chat_id, pairs) in by_chat {
            let lines = self.market_lines(&pairs).await?;
            let text = format_market_update(&lines, self.clock.now());
            self.deliver(chat_id, &text, &mut report).await;
        }
        info!(sent = report.sent, failed = report.failed, "Subscriber digests sent");
        Ok(report)
    }

    /// Notify the channel of large short-window moves, once per pair and direction per window.
    pub async fn broadcast_significant_moves(
        &self,
        snapshot: &MarketSnapshot,
    ) -> Result<DeliveryReport, NotifierError> {
        let mut report = DeliveryReport::default();
        let Some(channel) = self.channel_id else {
            return Ok(report);
        };
        self.moves.purge_expired();

        let hours = self.settings.significant_move_hours;
        let mut quotes: Vec<(String, SourceQuote)> =
            snapshot.current_quotes().into_iter().collect();
        quotes.sort_by(|a, b| a.0.cmp(&b.0));

        for (pair, SourceQuote { price, source }) in quotes {
            let Some(change) = self.db.percent_change(&pair, source, hours).await? else {
                continue;
            };
            if change.abs() < self.settings.significant_move_pct {
                continue;
            }
            let direction = if change > 0.0 {
                AlertType::PriceUp
            } else {
                AlertType::PriceDown
            };
            let key = CooldownKey::new(channel, pair.clone(), direction);
            if self.moves.is_cooling(&key) {
                continue;
            }
            info!(pair = %pair, change, "Significant move detected");
            let text = format_significant_move(&pair, price, change, hours);
            self.deliver(channel, &text, &mut report).await;
            self.moves.mark(key);
        }
        Ok(report)
    }

    /// Drop price history past the retention window.
    pub async fn cleanup(&self) -> Result<u64, NotifierError> {
        let deleted = self
            .db
            .cleanup_old_history(self.settings.history_retention_days)
            .await?;
        if deleted > 0 {
            info!(deleted, "Cleaned up old price history");
        }
        Ok(deleted)
    }
}
