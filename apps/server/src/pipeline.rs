//! One price tick: fetch every source, refresh the redemption rate, record history
//! and publish the snapshot the bot reads from.

use crate::config::AppConfig;
use nicp_alerts::Database;
use nicp_core::{
    Clock, MarketSnapshot, RedemptionRate, SharedSnapshot, Source, SourceQuote, SystemClock,
};
use nicp_feeds::{
    FeedError, HttpFetcher, JsonFetcher, RedemptionClient, SymbolResolver, TickerClient,
    TickerNormalizer,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct TickSummary {
    pub pairs: usize,
    pub recorded: usize,
    pub rate: RedemptionRate,
}

pub struct Pipeline {
    tickers: TickerClient,
    redemption: RedemptionClient,
    db: Database,
    snapshot: SharedSnapshot,
    clock: Arc<dyn Clock>,
    last_probe: Mutex<BTreeMap<Source, bool>>,
}

impl Pipeline {
    pub fn new(
        tickers: TickerClient,
        redemption: RedemptionClient,
        db: Database,
        snapshot: SharedSnapshot,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tickers,
            redemption,
            db,
            snapshot,
            clock,
            last_probe: Mutex::new(BTreeMap::new()),
        }
    }

    /// HTTP-backed pipeline built from the application config.
    pub fn from_config(
        config: &AppConfig,
        db: Database,
        snapshot: SharedSnapshot,
    ) -> Result<Self, FeedError> {
        let fetcher: Arc<dyn JsonFetcher> = Arc::new(HttpFetcher::new(Duration::from_secs(
            config.fetch.request_timeout_secs,
        ))?);
        Ok(Self::with_fetcher(config, fetcher, db, snapshot, Arc::new(SystemClock)))
    }

    pub fn with_fetcher(
        config: &AppConfig,
        fetcher: Arc<dyn JsonFetcher>,
        db: Database,
        snapshot: SharedSnapshot,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let normalizer =
            TickerNormalizer::new(SymbolResolver::default(), config.normalizer.clone());
        let tickers = TickerClient::with_clock(
            fetcher.clone(),
            normalizer,
            config.fetch.clone(),
            clock.clone(),
        );
        let redemption =
            RedemptionClient::with_clock(fetcher, config.redemption.clone(), clock.clone());
        Self::new(tickers, redemption, db, snapshot, clock)
    }

    /// Fetch, record and publish. Never fails; unavailable parts are logged and skipped.
    pub async fn fetch_tick(&self) -> TickSummary {
        let (report, rate) =
            tokio::join!(self.tickers.fetch_all(), self.redemption.current_rate());

        let all_pairs: Vec<&nicp_core::PricePair> =
            report.pairs.values().flat_map(|p| p.values()).collect();
        let recorded = match self.db.record_pairs(all_pairs).await
        {
            Ok(n) => n,
            Err(e) => {
                error!(error = %e, "Failed to record price history");
                0
            }
        };

        if rate.provenance.is_fallback() {
            warn!(rate = rate.rate, "Using fallback redemption rate");
        }

        let pairs = report.pair_count();
        {
            let mut snapshot = self.snapshot.write().unwrap_or_else(|p| p.into_inner());
            snapshot.pairs = report.pairs;
            snapshot.health = report.health;
            snapshot.redemption = Some(rate.clone());
            snapshot.updated_at = Some(self.clock.now());
        }

        info!(
            pairs,
            recorded,
            rate = rate.rate,
            provenance = %rate.provenance,
            "Price tick complete"
        );
        TickSummary {
            pairs,
            recorded,
            rate,
        }
    }

    pub fn snapshot(&self) -> MarketSnapshot {
        self.snapshot
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn current_quotes(&self) -> HashMap<String, SourceQuote> {
        self.snapshot
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .current_quotes()
    }

    /// Probe every source and return those whose connectivity changed since the last probe.
    pub async fn check_health(&self) -> Vec<(Source, bool)> {
        let current = self.tickers.probe_all().await;
        let mut last = self.last_probe.lock().unwrap_or_else(|p| p.into_inner());

        let mut changes = Vec::new();
        for (&source, &up) in &current {
            if !up {
                warn!(source = %source, "Source unreachable");
            }
            // first probe only reports sources that start out down
            let was_up = last.get(&source).copied().unwrap_or(true);
            if was_up != up {
                changes.push((source, up));
            }
        }
        *last = current;
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use nicp_core::{shared_snapshot, ManualClock, RateProvenance, ICP_LEDGER, NICP_LEDGER};
    use nicp_engine::ArbitrageReport;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    const ICPSWAP_URL: &str = "https://uvevg-iyaaa-aaaak-ac27q-cai.raw.ic0.app/tickers";

    /// Answers only the URLs it was given; everything else is unreachable.
    #[derive(Default)]
    struct CannedFetcher {
        responses: Mutex<HashMap<String, Value>>,
    }

    impl CannedFetcher {
        fn with(self, url: &str, body: Value) -> Self {
            self.responses.lock().unwrap().insert(url.to_string(), body);
            self
        }

        fn remove(&self, url: &str) {
            self.responses.lock().unwrap().remove(url);
        }
    }

    #[async_trait]
    impl JsonFetcher for CannedFetcher {
        async fn get_json(&self, url: &str) -> Result<Value, FeedError> {
            self.responses
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| FeedError::Http(format!("connection refused: {url}")))
        }
    }

    fn icpswap_body() -> Value {
        json!([
            {
                "base_id": NICP_LEDGER,
                "target_id": ICP_LEDGER,
                "last_price": "0.979",
                "base_volume_24H": "10000",
                "target_volume_24H": "9790",
                "volume_usd_24H": "50000",
                "liquidity_in_usd": "200000"
            },
            {
                "base_id": "aaaaa-bbbbb-ccccc-ddddd-eee",
                "target_id": "fffff-ggggg-hhhhh-iiiii-jjj",
                "last_price": "1.5",
                "volume_usd_24H": "20",
                "liquidity_in_usd": "10"
            }
        ])
    }

    async fn pipeline(fetcher: Arc<CannedFetcher>) -> (Pipeline, Database, SharedSnapshot) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap(),
        ));
        let db = Database::connect_with_clock("sqlite::memory:", clock.clone())
            .await
            .unwrap();
        let snapshot = shared_snapshot();
        let pipeline = Pipeline::with_fetcher(
            &AppConfig::default(),
            fetcher,
            db.clone(),
            snapshot.clone(),
            clock,
        );
        (pipeline, db, snapshot)
    }

    #[tokio::test]
    async fn test_icpswap_nicp_tick_is_viable_end_to_end() {
        let fetcher = Arc::new(CannedFetcher::default().with(ICPSWAP_URL, icpswap_body()));
        let (pipeline, db, _) = pipeline(fetcher).await;

        let summary = pipeline.fetch_tick().await;
        assert_eq!(summary.pairs, 1);
        assert_eq!(summary.recorded, 1);
        assert_eq!(summary.rate.provenance, RateProvenance::Configured);
        assert_eq!(summary.rate.rate, 0.9001103);

        let snapshot = pipeline.snapshot();
        assert!(snapshot.health[&Source::IcpSwap].connected);
        assert!(!snapshot.health[&Source::KongSwap].connected);

        let report = ArbitrageReport::build(&snapshot.pairs, &summary.rate, 6);
        let best = report.best_opportunity().unwrap();
        assert_eq!(best.source, Source::IcpSwap);
        assert!(best.arbitrage.viable);
        let profit = best.arbitrage.profit_percentage();
        assert!(profit > 13.0 && profit < 14.0, "profit {profit}");

        let latest = db.latest_price("NICP/ICP").await.unwrap().unwrap();
        assert_eq!(latest.price, 0.979);
        assert_eq!(
            pipeline.current_quotes()["NICP/ICP"],
            SourceQuote {
                price: 0.979,
                source: Source::IcpSwap
            }
        );
    }

    #[tokio::test]
    async fn test_all_sources_down_yields_empty_snapshot() {
        let (pipeline, _, snapshot) = pipeline(Arc::new(CannedFetcher::default())).await;
        let summary = pipeline.fetch_tick().await;
        assert_eq!(summary.pairs, 0);
        assert_eq!(summary.recorded, 0);

        let snapshot = snapshot.read().unwrap();
        assert!(snapshot.is_empty());
        assert!(snapshot.updated_at.is_some());
        assert!(snapshot.health.values().all(|h| !h.connected));
    }

    #[tokio::test]
    async fn test_health_reports_transitions_only() {
        let fetcher = Arc::new(CannedFetcher::default().with(ICPSWAP_URL, icpswap_body()));
        let (pipeline, _, _) = pipeline(fetcher.clone()).await;

        assert_eq!(pipeline.check_health().await, vec![(Source::KongSwap, false)]);
        assert!(pipeline.check_health().await.is_empty());

        fetcher.remove(ICPSWAP_URL);
        assert_eq!(pipeline.check_health().await, vec![(Source::IcpSwap, false)]);
    }
}
