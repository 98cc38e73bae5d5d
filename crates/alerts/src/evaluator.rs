//! Price-change alert evaluation.

use crate::config::AlertSettings;
use crate::cooldown::{CooldownKey, CooldownTracker};
use crate::db::{Database, DbError};
use crate::dispatch::{send_split, AlertDispatcher};
use crate::message::format_price_alert;
use nicp_core::{ActiveAlert, AlertLogEntry, AlertType, Clock, SourceQuote, SystemClock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Counters for one evaluation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvaluationSummary {
    pub checked: usize,
    pub fired: usize,
    pub delivered: usize,
    pub failed: usize,
    pub skipped_cooldown: usize,
    pub skipped_no_data: usize,
}

pub struct AlertEvaluator {
    db: Database,
    dispatcher: Arc<dyn AlertDispatcher>,
    cooldown: CooldownTracker,
    settings: AlertSettings,
    clock: Arc<dyn Clock>,
}

impl AlertEvaluator {
    pub fn new(
        db: Database,
        dispatcher: Arc<dyn AlertDispatcher>,
        settings: AlertSettings,
    ) -> Self {
        Self::with_clock(db, dispatcher, settings, Arc::new(SystemClock))
    }

    pub fn with_clock(
        db: Database,
        dispatcher: Arc<dyn AlertDispatcher>,
        settings: AlertSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cooldown = CooldownTracker::with_clock(settings.cooldown(), clock.clone());
        Self {
            db,
            dispatcher,
            cooldown,
            settings,
            clock,
        }
    }

    pub fn cooldown(&self) -> &CooldownTracker {
        &self.cooldown
    }

    /// Load active alerts and evaluate them against the current quote of each pair.
    pub async fn run(
        &self,
        quotes: &HashMap<String, SourceQuote>,
    ) -> Result<EvaluationSummary, DbError> {
        let alerts = self.db.get_active_alerts().await?;
        self.cooldown.purge_expired();
        let summary = self.evaluate_alerts(&alerts, quotes).await;
        info!(
            checked = summary.checked,
            fired = summary.fired,
            delivered = summary.delivered,
            failed = summary.failed,
            "Alert check complete"
        );
        Ok(summary)
    }

    /// Evaluate each alert independently; one alert's failure never stops the rest.
    ///
    /// The trailing change is measured on the history of the source the quote came from.
    pub async fn evaluate_alerts(
        &self,
        alerts: &[ActiveAlert],
        quotes: &HashMap<String, SourceQuote>,
    ) -> EvaluationSummary {
        let mut summary = EvaluationSummary::default();

        for active in alerts {
            summary.checked += 1;
            let alert = &active.alert;

            let Some(&SourceQuote { price, source }) = quotes.get(&alert.pair) else {
                debug!(pair = %alert.pair, "No current price for alert pair");
                summary.skipped_no_data += 1;
                continue;
            };

            let key = CooldownKey::new(alert.user_id, alert.pair.clone(), alert.alert_type);
            if self.cooldown.is_cooling(&key) {
                summary.skipped_cooldown += 1;
                continue;
            }

            let change = match alert.alert_type {
                AlertType::VolumeSpike => continue,
                AlertType::PriceUp | AlertType::PriceDown => {
                    match self
                        .db
                        .percent_change(&alert.pair, source, self.settings.change_window_hours)
                        .await
                    {
                        Ok(Some(change)) => change,
                        Ok(None) => {
                            summary.skipped_no_data += 1;
                            continue;
                        }
                        Err(e) => {
                            error!(alert_id = alert.id, error = %e, "Failed to read price history");
                            summary.skipped_no_data += 1;
                            continue;
                        }
                    }
                }
            };

            let triggered = match alert.alert_type {
                AlertType::PriceUp => change >= alert.threshold,
                AlertType::PriceDown => change <= -alert.threshold,
                AlertType::VolumeSpike => false,
            };
            if !triggered {
                continue;
            }

            summary.fired += 1;
            let message = format_price_alert(
                &alert.pair,
                alert.alert_type,
                price,
                change,
                self.settings.change_window_hours,
                alert.threshold,
                self.clock.now(),
            );

            let delivered =
                match send_split(self.dispatcher.as_ref(), active.telegram_id, &message).await {
                    Ok(_) => {
                        info!(
                            chat_id = active.telegram_id,
                            pair = %alert.pair,
                            alert_type = %alert.alert_type,
                            change,
                            "Alert sent"
                        );
                        true
                    }
                    Err(e) => {
                        error!(chat_id = active.telegram_id, error = %e, "Failed to send alert");
                        false
                    }
                };
            self.cooldown.mark(key);

            if delivered {
                summary.delivered += 1;
                if let Err(e) = self.db.mark_alert_triggered(alert.id).await {
                    error!(alert_id = alert.id, error = %e, "Failed to update alert bookkeeping");
                }
            } else {
                summary.failed += 1;
            }

            let entry = AlertLogEntry {
                user_id: alert.user_id,
                alert_id: Some(alert.id),
                pair: alert.pair.clone(),
                message,
                price,
                price_change: change,
                delivered,
            };
            if let Err(e) = self.db.log_alert(&entry).await {
                error!(alert_id = alert.id, error = %e, "Failed to log alert");
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests::RecordingDispatcher;
    use chrono::{Duration, TimeZone, Utc};
    use nicp_core::{ManualClock, NewUser, PricePair, Source};
    use pretty_assertions::assert_eq;

    struct Fixture {
        db: Database,
        clock: Arc<ManualClock>,
        alert_id: i64,
    }

    async fn fixture(alert_type: AlertType, threshold: f64, prices: &[f64]) -> Fixture {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap(),
        ));
        let db = Database::connect_with_clock("sqlite::memory:", clock.clone())
            .await
            .unwrap();
        let user = db
            .register_user(&NewUser {
                telegram_id: 1001,
                ..Default::default()
            })
            .await
            .unwrap();
        let alert_id = db
            .create_alert(user.id, "NICP/ICP", alert_type, threshold)
            .await
            .unwrap();
        for &price in prices {
            db.record_price("NICP/ICP", price, None, Source::IcpSwap, None)
                .await
                .unwrap();
            clock.advance(Duration::minutes(30));
        }
        Fixture { db, clock, alert_id }
    }

    fn evaluator(f: &Fixture, dispatcher: Arc<RecordingDispatcher>) -> AlertEvaluator {
        AlertEvaluator::with_clock(
            f.db.clone(),
            dispatcher,
            AlertSettings::default(),
            f.clock.clone(),
        )
    }

    fn prices(price: f64) -> HashMap<String, SourceQuote> {
        HashMap::from([(
            "NICP/ICP".to_string(),
            SourceQuote {
                price,
                source: Source::IcpSwap,
            },
        )])
    }

    #[tokio::test]
    async fn test_price_up_fires_once_then_after_cooldown() {
        let f = fixture(AlertType::PriceUp, 2.0, &[0.95, 0.97]).await;
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let evaluator = evaluator(&f, dispatcher.clone());

        let first = evaluator.run(&prices(0.97)).await.unwrap();
        assert_eq!(first.fired, 1);
        assert_eq!(first.delivered, 1);
        assert_eq!(dispatcher.sent().len(), 1);
        assert!(dispatcher.sent()[0].1.contains("+2.11%"));
        assert_eq!(dispatcher.sent()[0].0, 1001);

        let second = evaluator.run(&prices(0.97)).await.unwrap();
        assert_eq!(second.skipped_cooldown, 1);
        assert_eq!(dispatcher.sent().len(), 1);

        f.clock.advance(Duration::seconds(300));
        let third = evaluator.run(&prices(0.97)).await.unwrap();
        assert_eq!(third.delivered, 1);
        assert_eq!(dispatcher.sent().len(), 2);

        let alert = f.db.get_alert(f.alert_id).await.unwrap().unwrap();
        assert_eq!(alert.trigger_count, 2);
    }

    #[tokio::test]
    async fn test_below_threshold_does_not_fire() {
        let f = fixture(AlertType::PriceUp, 5.0, &[0.95, 0.97]).await;
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let summary = evaluator(&f, dispatcher.clone()).run(&prices(0.97)).await.unwrap();
        assert_eq!(summary.checked, 1);
        assert_eq!(summary.fired, 0);
        assert!(dispatcher.sent().is_empty());
    }

    #[tokio::test]
    async fn test_price_down_fires() {
        let f = fixture(AlertType::PriceDown, 5.0, &[0.97, 0.92]).await;
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let summary = evaluator(&f, dispatcher.clone()).run(&prices(0.92)).await.unwrap();
        assert_eq!(summary.delivered, 1);
        assert!(dispatcher.sent()[0].1.contains("DOWN"));
    }

    #[tokio::test]
    async fn test_failed_dispatch_keeps_alert_untriggered() {
        let f = fixture(AlertType::PriceUp, 2.0, &[0.95, 0.97]).await;
        let dispatcher = Arc::new(RecordingDispatcher::failing());
        let evaluator = evaluator(&f, dispatcher);

        let summary = evaluator.run(&prices(0.97)).await.unwrap();
        assert_eq!(summary.fired, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.delivered, 0);

        let alert = f.db.get_alert(f.alert_id).await.unwrap().unwrap();
        assert_eq!(alert.trigger_count, 0);
        assert!(alert.last_triggered.is_none());
        assert_eq!(f.db.alert_attempts(f.alert_id).await.unwrap(), (1, 0));

        // attempts still start the cooldown
        let again = evaluator.run(&prices(0.97)).await.unwrap();
        assert_eq!(again.skipped_cooldown, 1);
    }

    #[tokio::test]
    async fn test_missing_pair_and_history_skipped() {
        let f = fixture(AlertType::PriceUp, 1.0, &[0.95]).await;
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let evaluator = evaluator(&f, dispatcher.clone());

        let absent = evaluator.run(&HashMap::new()).await.unwrap();
        assert_eq!(absent.skipped_no_data, 1);

        // one observation is not enough for a change
        let thin = evaluator.run(&prices(0.99)).await.unwrap();
        assert_eq!(thin.skipped_no_data, 1);
        assert!(dispatcher.sent().is_empty());
    }

    #[tokio::test]
    async fn test_volume_spike_never_fires() {
        let f = fixture(AlertType::VolumeSpike, 0.0, &[0.5, 0.97]).await;
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let summary = evaluator(&f, dispatcher.clone()).run(&prices(0.97)).await.unwrap();
        assert_eq!(summary.checked, 1);
        assert_eq!(summary.fired, 0);
        assert!(dispatcher.sent().is_empty());
    }

    #[tokio::test]
    async fn test_spread_between_sources_is_not_a_move() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap(),
        ));
        let db = Database::connect_with_clock("sqlite::memory:", clock.clone())
            .await
            .unwrap();
        let user = db
            .register_user(&NewUser {
                telegram_id: 2002,
                ..Default::default()
            })
            .await
            .unwrap();
        db.create_alert(user.id, "NICP/ICP", AlertType::PriceUp, 2.0)
            .await
            .unwrap();

        let quote = |price: f64, source: Source| PricePair {
            pair_name: "NICP/ICP".into(),
            base: "NICP".into(),
            quote: "ICP".into(),
            base_id: "b".into(),
            quote_id: "q".into(),
            price,
            volume_24h_usd: 50_000.0,
            liquidity_usd: 200_000.0,
            source,
            raw_payload: serde_json::Value::Null,
        };
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let evaluator = AlertEvaluator::with_clock(
            db.clone(),
            dispatcher.clone(),
            AlertSettings::default(),
            clock.clone(),
        );
        let current = HashMap::from([(
            "NICP/ICP".to_string(),
            SourceQuote {
                price: 0.99,
                source: Source::KongSwap,
            },
        )]);

        // flat prices on both DEXes, 2% apart
        for _ in 0..3 {
            db.record_pairs([&quote(0.97, Source::IcpSwap), &quote(0.99, Source::KongSwap)])
                .await
                .unwrap();
            let summary = evaluator.run(&current).await.unwrap();
            assert_eq!(summary.fired, 0);
            clock.advance(Duration::minutes(1));
        }
        assert!(dispatcher.sent().is_empty());
    }
}
