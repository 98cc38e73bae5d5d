//! nICP Tracker - Headless Server
//!
//! Polls ICP DEX tickers, tracks the nICP redemption discount and serves
//! price alerts through a Telegram bot.

mod config;
mod pipeline;
mod status_notifier;

use clap::Parser;
use config::AppConfig;
use nicp_alerts::{AlertDispatcher, AlertEvaluator, Database, Notifier, TelegramBot};
use nicp_core::shared_snapshot;
use nicp_engine::ArbitrageReport;
use pipeline::Pipeline;
use status_notifier::{try_start_status_notifier, StatusEvent, StatusNotifierHandle};
use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// nICP Tracker CLI
#[derive(Parser, Debug)]
#[command(name = "nicp-tracker")]
#[command(about = "ICP DEX price monitor with nICP arbitrage alerts", long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short, long)]
    log_level: Option<String>,

    /// SQLite database URL
    #[arg(long)]
    database_url: Option<String>,

    /// Run a single fetch and print the arbitrage summary, without the bot
    #[arg(long, default_value_t = false)]
    once: bool,
}

/// `RUST_LOG` takes precedence over the configured level.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("tracing subscriber already set");
    }
}

/// Run `task` every `period`, first after `delay`. Overdue ticks are skipped.
fn spawn_periodic<F, Fut>(
    name: &'static str,
    delay: Duration,
    period: Duration,
    mut task: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + delay, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(task = name, period_secs = period.as_secs(), "Scheduled task started");
        loop {
            ticker.tick().await;
            task().await;
        }
    })
}

async fn run_once(pipeline: &Pipeline, dissolution_months: u32) {
    let summary = pipeline.fetch_tick().await;
    let snapshot = pipeline.snapshot();

    for (source, health) in &snapshot.health {
        info!(
            "  {}: {} ({} pairs)",
            source,
            if health.connected { "connected" } else { "unreachable" },
            health.pair_count
        );
    }

    let report = ArbitrageReport::build(&snapshot.pairs, &summary.rate, dissolution_months);
    info!(
        "Redemption rate {:.7} ({})",
        summary.rate.rate, summary.rate.provenance
    );
    if report.is_empty() {
        warn!("No nICP/ICP quotes available");
        return;
    }
    for opp in &report.opportunities {
        info!(
            "  {} {}: {:.4} ICP | profit {:.2}% | APY {:.2}% | {}",
            opp.source,
            opp.pair_name,
            opp.nicp_price_in_icp,
            opp.arbitrage.profit_percentage(),
            opp.arbitrage.annualized_percentage(),
            opp.arbitrage.recommendation.as_str()
        );
    }
    match report.best_opportunity() {
        Some(best) => info!("Best: {} ({:.2}%)", best.source, best.arbitrage.profit_percentage()),
        None => info!("No viable opportunity"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let mut config = match AppConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            init_logging(args.log_level.as_deref().unwrap_or("info"));
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    if let Some(url) = args.database_url {
        config.database_url = url;
    }
    init_logging(&config.log_level);

    info!("🚀 nICP Tracker starting...");
    info!("  Database: {}", config.database_url);
    info!("  Dissolution period: {} months", config.dissolution_months);
    info!(
        "  Intervals: fetch {}s, alerts {}s, market update {}s",
        config.intervals.data_fetch_secs,
        config.intervals.alert_check_secs,
        config.intervals.market_update_secs
    );

    if !args.once {
        if let Err(e) = config.validate() {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    }

    let db = match Database::connect(&config.database_url).await {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to open database: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let snapshot = shared_snapshot();
    let pipeline = match Pipeline::from_config(&config, db.clone(), snapshot.clone()) {
        Ok(pipeline) => Arc::new(pipeline),
        Err(e) => {
            error!("Failed to build HTTP client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if args.once {
        run_once(&pipeline, config.dissolution_months).await;
        return ExitCode::SUCCESS;
    }

    let bot = Arc::new(
        TelegramBot::new(
            &config.telegram_bot_token,
            db.clone(),
            snapshot.clone(),
            config.dissolution_months,
        )
        .with_settings(&config.alerts),
    );
    let dispatcher: Arc<dyn AlertDispatcher> = bot.clone();
    let evaluator = Arc::new(AlertEvaluator::new(
        db.clone(),
        dispatcher.clone(),
        config.alerts.clone(),
    ));
    let notifier = Arc::new(Notifier::new(
        db.clone(),
        dispatcher,
        config.telegram_channel_id,
        config.alerts.clone(),
        config.dissolution_months,
    ));
    if notifier.has_channel() {
        info!("  Market updates: enabled");
    } else {
        info!("  Market updates: disabled (TELEGRAM_CHANNEL_ID not set)");
    }

    let status: Option<StatusNotifierHandle> = try_start_status_notifier();
    if let Some(ref status) = status {
        status.send(StatusEvent::ServerStarted).await;
    }

    let intervals = config.intervals.clone();
    let mut handles = Vec::new();

    {
        let pipeline = pipeline.clone();
        let status = status.clone();
        let on_fallback = Arc::new(AtomicBool::new(false));
        handles.push(spawn_periodic(
            "data fetch",
            Duration::ZERO,
            intervals.data_fetch(),
            move || {
                let pipeline = pipeline.clone();
                let status = status.clone();
                let on_fallback = on_fallback.clone();
                async move {
                    let summary = pipeline.fetch_tick().await;
                    let fallback = summary.rate.provenance.is_fallback();
                    let was_fallback = on_fallback.swap(fallback, Ordering::Relaxed);
                    if fallback && !was_fallback {
                        if let Some(status) = status {
                            status.try_send(StatusEvent::RedemptionFallback(summary.rate.rate));
                        }
                    }
                }
            },
        ));
    }

    {
        let pipeline = pipeline.clone();
        let evaluator = evaluator.clone();
        let notifier = notifier.clone();
        let period = intervals.alert_check();
        handles.push(spawn_periodic("alert check", period, period, move || {
            let pipeline = pipeline.clone();
            let evaluator = evaluator.clone();
            let notifier = notifier.clone();
            async move {
                match evaluator.run(&pipeline.current_quotes()).await {
                    Ok(summary) if summary.fired > 0 => info!(
                        fired = summary.fired,
                        delivered = summary.delivered,
                        failed = summary.failed,
                        "Alert check complete"
                    ),
                    Ok(_) => {}
                    Err(e) => error!("Alert check failed: {}", e),
                }
                if let Err(e) = notifier.broadcast_significant_moves(&pipeline.snapshot()).await {
                    error!("Significant move check failed: {}", e);
                }
            }
        }));
    }

    {
        let pipeline = pipeline.clone();
        let notifier = notifier.clone();
        let period = intervals.market_update();
        handles.push(spawn_periodic("market update", period, period, move || {
            let pipeline = pipeline.clone();
            let notifier = notifier.clone();
            async move {
                let snapshot = pipeline.snapshot();
                if let Err(e) = notifier.send_market_update(&snapshot).await {
                    error!("Market update failed: {}", e);
                }
                if let Err(e) = notifier.send_subscriber_digests(&snapshot).await {
                    error!("Subscriber digests failed: {}", e);
                }
            }
        }));
    }

    {
        let pipeline = pipeline.clone();
        let status = status.clone();
        let period = intervals.health_check();
        handles.push(spawn_periodic("health check", period, period, move || {
            let pipeline = pipeline.clone();
            let status = status.clone();
            async move {
                for (source, up) in pipeline.check_health().await {
                    if up {
                        info!("✅ {} recovered", source);
                    } else {
                        warn!("⚠️ {} unreachable", source);
                    }
                    if let Some(ref status) = status {
                        status.try_send(StatusEvent::from_transition(source, up));
                    }
                }
            }
        }));
    }

    {
        let notifier = notifier.clone();
        let period = intervals.cleanup();
        handles.push(spawn_periodic("history cleanup", period, period, move || {
            let notifier = notifier.clone();
            async move {
                if let Err(e) = notifier.cleanup().await {
                    error!("History cleanup failed: {}", e);
                }
            }
        }));
    }

    let bot_handle = tokio::spawn(bot.run());

    info!("✅ nICP Tracker running. Press Ctrl+C to stop.");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
    }

    warn!("Shutdown signal received");
    if let Some(ref status) = status {
        status.send(StatusEvent::ServerStopping).await;
        // let the notifier task flush the stop message
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    for handle in handles {
        handle.abort();
    }
    let _ = tokio::time::timeout(Duration::from_secs(2), bot_handle).await;

    match db.stats().await {
        Ok(stats) => {
            info!("📈 Final Stats:");
            info!("  Users: {}", stats.users);
            info!("  Active alerts: {}", stats.active_alerts);
            info!("  Price records: {}", stats.price_records);
            info!("  Alerts delivered (24h): {}", stats.alerts_delivered_24h);
        }
        Err(e) => warn!("Failed to read final stats: {}", e),
    }

    info!("👋 nICP Tracker stopped");
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from([
            "nicp-tracker",
            "--config",
            "tracker.json",
            "-l",
            "debug",
            "--once",
        ]);
        assert_eq!(args.config, Some(PathBuf::from("tracker.json")));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.database_url.is_none());
        assert!(args.once);
    }

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["nicp-tracker"]);
        assert!(args.config.is_none());
        assert!(!args.once);
    }
}
