//! SQLite store for users, price history, alert rules, subscriptions and the dispatch log.

use chrono::{DateTime, Duration, Utc};
use nicp_core::{
    referral_code, ActiveAlert, AlertLogEntry, AlertType, Clock, NewUser, PriceHistoryRecord,
    PricePair, Source, SystemClock, UserAlert, UserProfile,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("User not registered: {0}")]
    UserNotFound(i64),
}

/// Row counts for the status view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DbStats {
    pub users: i64,
    pub active_alerts: i64,
    pub active_subscriptions: i64,
    pub price_records: i64,
    pub alerts_delivered_24h: i64,
}

type UserRow = (
    i64,
    i64,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    Option<String>,
    bool,
    i64,
    i64,
);

type AlertRow = (i64, i64, String, String, f64, bool, Option<i64>, i64, i64);

type HistoryRow = (i64, String, f64, Option<f64>, String, i64, Option<String>);

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn user_from_row(row: UserRow) -> UserProfile {
    let (
        id,
        telegram_id,
        username,
        first_name,
        last_name,
        code,
        referred_by,
        active,
        created,
        seen,
    ) = row;
    UserProfile {
        id,
        telegram_id,
        username,
        first_name,
        last_name,
        referral_code: code,
        referred_by,
        is_active: active,
        created_at: from_millis(created),
        last_activity: from_millis(seen),
    }
}

fn alert_from_row(row: AlertRow) -> Option<UserAlert> {
    let (id, user_id, pair, kind, threshold, is_active, last_triggered, trigger_count, created) =
        row;
    let alert_type = match kind.parse::<AlertType>() {
        Ok(t) => t,
        Err(e) => {
            warn!(alert_id = id, error = %e, "Skipping alert with unknown type");
            return None;
        }
    };
    Some(UserAlert {
        id,
        user_id,
        pair,
        alert_type,
        threshold,
        is_active,
        last_triggered: last_triggered.map(from_millis),
        trigger_count,
        created_at: from_millis(created),
    })
}

fn history_from_row(row: HistoryRow) -> Option<PriceHistoryRecord> {
    let (id, pair, price, volume_24h, source, ts, raw_data) = row;
    Some(PriceHistoryRecord {
        id,
        pair,
        price,
        volume_24h,
        source: Source::from_key(&source)?,
        timestamp: from_millis(ts),
        raw_data,
    })
}

/// Database connection.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl Database {
    /// Connect to SQLite database at the given path.
    pub async fn connect(database_url: &str) -> Result<Self, DbError> {
        Self::connect_with_clock(database_url, Arc::new(SystemClock)).await
    }

    pub async fn connect_with_clock(
        database_url: &str,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, DbError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        // each in-memory connection would otherwise see its own empty database
        let in_memory = database_url.contains(":memory:");
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .min_connections(if in_memory { 1 } else { 0 })
            .idle_timeout(if in_memory { None } else { Some(std::time::Duration::from_secs(600)) })
            .connect_with(options)
            .await?;

        let db = Self { pool, clock };
        db.run_migrations().await?;
        Ok(db)
    }

    fn now_ms(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), DbError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                telegram_id INTEGER NOT NULL UNIQUE,
                username TEXT,
                first_name TEXT,
                last_name TEXT,
                referral_code TEXT NOT NULL,
                referred_by TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                last_activity INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS price_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pair TEXT NOT NULL,
                price REAL NOT NULL,
                volume_24h REAL,
                source TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                raw_data TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_price_history_pair_source_ts ON price_history(pair, source, timestamp)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id),
                pair TEXT NOT NULL,
                alert_type TEXT NOT NULL,
                threshold REAL NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                last_triggered INTEGER,
                trigger_count INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_subscriptions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id),
                pair TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                UNIQUE(user_id, pair)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alert_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                alert_id INTEGER,
                pair TEXT NOT NULL,
                message TEXT NOT NULL,
                price REAL NOT NULL,
                price_change REAL NOT NULL,
                delivered INTEGER NOT NULL,
                sent_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // === Users ===

    /// Register a user, or refresh the profile and activity time of an existing one.
    pub async fn register_user(&self, user: &NewUser) -> Result<UserProfile, DbError> {
        let now = self.now_ms();
        sqlx::query(
            r#"
            INSERT INTO users (telegram_id, username, first_name, last_name, referral_code, referred_by, created_at, last_activity)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(telegram_id) DO UPDATE SET
                username = excluded.username,
                first_name = excluded.first_name,
                last_name = excluded.last_name,
                is_active = 1,
                last_activity = excluded.last_activity
            "#,
        )
        .bind(user.telegram_id)
        .bind(&user.username)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(referral_code(user.telegram_id))
        .bind(&user.referred_by)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_user(user.telegram_id)
            .await?
            .ok_or(DbError::UserNotFound(user.telegram_id))
    }

    pub async fn get_user(&self, telegram_id: i64) -> Result<Option<UserProfile>, DbError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, telegram_id, username, first_name, last_name, referral_code, referred_by, is_active, created_at, last_activity FROM users WHERE telegram_id = ?",
        )
        .bind(telegram_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(user_from_row))
    }

    /// Internal id of a registered user.
    pub async fn require_user(&self, telegram_id: i64) -> Result<i64, DbError> {
        sqlx::query_scalar::<_, i64>("SELECT id FROM users WHERE telegram_id = ?")
            .bind(telegram_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(DbError::UserNotFound(telegram_id))
    }

    pub async fn touch_user(&self, telegram_id: i64) -> Result<(), DbError> {
        sqlx::query("UPDATE users SET last_activity = ? WHERE telegram_id = ?")
            .bind(self.now_ms())
            .bind(telegram_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // === Price history ===

    /// Append one observation. The stored timestamp never precedes an earlier row's.
    pub async fn record_price(
        &self,
        pair: &str,
        price: f64,
        volume_24h: Option<f64>,
        source: Source,
        raw_data: Option<&str>,
    ) -> Result<i64, DbError> {
        let result = sqlx::query(
            r#"
            INSERT INTO price_history (pair, price, volume_24h, source, timestamp, raw_data)
            VALUES (?, ?, ?, ?, MAX(?, COALESCE((SELECT MAX(timestamp) FROM price_history), 0)), ?)
            "#,
        )
        .bind(pair)
        .bind(price)
        .bind(volume_24h)
        .bind(source.key())
        .bind(self.now_ms())
        .bind(raw_data)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Append every pair in one transaction.
    pub async fn record_pairs<'a>(
        &self,
        pairs: impl IntoIterator<Item = &'a PricePair>,
    ) -> Result<usize, DbError> {
        let mut tx = self.pool.begin().await?;
        let now = self.now_ms();
        let mut count = 0;
        for pair in pairs {
            sqlx::query(
                r#"
                INSERT INTO price_history (pair, price, volume_24h, source, timestamp, raw_data)
                VALUES (?, ?, ?, ?, MAX(?, COALESCE((SELECT MAX(timestamp) FROM price_history), 0)), ?)
                "#,
            )
            .bind(pair.pair_name.as_str())
            .bind(pair.price)
            .bind(pair.volume_24h_usd)
            .bind(pair.source.key())
            .bind(now)
            .bind(pair.raw_payload.to_string())
            .execute(&mut *tx)
            .await?;
            count += 1;
        }
        tx.commit().await?;
        Ok(count)
    }

    pub async fn latest_price(&self, pair: &str) -> Result<Option<PriceHistoryRecord>, DbError> {
        let row = sqlx::query_as::<_, HistoryRow>(
            "SELECT id, pair, price, volume_24h, source, timestamp, raw_data FROM price_history WHERE pair = ? ORDER BY timestamp DESC, id DESC LIMIT 1",
        )
        .bind(pair)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(history_from_row))
    }

    /// Observations within the trailing window, oldest first.
    pub async fn price_history(
        &self,
        pair: &str,
        hours: i64,
    ) -> Result<Vec<PriceHistoryRecord>, DbError> {
        let since = (self.clock.now() - Duration::hours(hours)).timestamp_millis();
        let rows = sqlx::query_as::<_, HistoryRow>(
            "SELECT id, pair, price, volume_24h, source, timestamp, raw_data FROM price_history WHERE pair = ? AND timestamp >= ? ORDER BY timestamp ASC, id ASC",
        )
        .bind(pair)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().filter_map(history_from_row).collect())
    }

    /// Percent change from the earliest to the latest observation of `source`'s quotes
    /// within the window. Sources are never compared with each other.
    ///
    /// `None` with fewer than two observations or a zero starting price.
    pub async fn percent_change(
        &self,
        pair: &str,
        source: Source,
        hours: i64,
    ) -> Result<Option<f64>, DbError> {
        let since = (self.clock.now() - Duration::hours(hours)).timestamp_millis();
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM price_history WHERE pair = ? AND source = ? AND timestamp >= ?",
        )
        .bind(pair)
        .bind(source.key())
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        if count < 2 {
            return Ok(None);
        }

        let earliest = sqlx::query_scalar::<_, f64>(
            "SELECT price FROM price_history WHERE pair = ? AND source = ? AND timestamp >= ? ORDER BY timestamp ASC, id ASC LIMIT 1",
        )
        .bind(pair)
        .bind(source.key())
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        let latest = sqlx::query_scalar::<_, f64>(
            "SELECT price FROM price_history WHERE pair = ? AND source = ? AND timestamp >= ? ORDER BY timestamp DESC, id DESC LIMIT 1",
        )
        .bind(pair)
        .bind(source.key())
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        if earliest == 0.0 {
            return Ok(None);
        }
        Ok(Some((latest - earliest) / earliest * 100.0))
    }

    /// Clean up price history older than `days`.
    pub async fn cleanup_old_history(&self, days: i64) -> Result<u64, DbError> {
        let cutoff = (self.clock.now() - Duration::days(days)).timestamp_millis();
        let result = sqlx::query("DELETE FROM price_history WHERE timestamp < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // === Alerts ===

    pub async fn create_alert(
        &self,
        user_id: i64,
        pair: &str,
        alert_type: AlertType,
        threshold: f64,
    ) -> Result<i64, DbError> {
        let result = sqlx::query(
            "INSERT INTO user_alerts (user_id, pair, alert_type, threshold, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(pair.to_uppercase())
        .bind(alert_type.as_str())
        .bind(threshold)
        .bind(self.now_ms())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_alert(&self, alert_id: i64) -> Result<Option<UserAlert>, DbError> {
        let row = sqlx::query_as::<_, AlertRow>(
            "SELECT id, user_id, pair, alert_type, threshold, is_active, last_triggered, trigger_count, created_at FROM user_alerts WHERE id = ?",
        )
        .bind(alert_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(alert_from_row))
    }

    /// Active alerts of one user.
    pub async fn get_user_alerts(&self, user_id: i64) -> Result<Vec<UserAlert>, DbError> {
        let rows = sqlx::query_as::<_, AlertRow>(
            "SELECT id, user_id, pair, alert_type, threshold, is_active, last_triggered, trigger_count, created_at FROM user_alerts WHERE user_id = ? AND is_active = 1 ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().filter_map(alert_from_row).collect())
    }

    /// Deactivate an alert owned by `user_id`. Returns false if no such active alert.
    pub async fn deactivate_alert(&self, user_id: i64, alert_id: i64) -> Result<bool, DbError> {
        let result = sqlx::query(
            "UPDATE user_alerts SET is_active = 0 WHERE id = ? AND user_id = ? AND is_active = 1",
        )
        .bind(alert_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Every active alert of every active user, with the owner's chat id.
    pub async fn get_active_alerts(&self) -> Result<Vec<ActiveAlert>, DbError> {
        let rows = sqlx::query_as::<_, (i64, i64, String, String, f64, bool, Option<i64>, i64, i64, i64)>(
            r#"
            SELECT a.id, a.user_id, a.pair, a.alert_type, a.threshold, a.is_active,
                   a.last_triggered, a.trigger_count, a.created_at, u.telegram_id
            FROM user_alerts a
            JOIN users u ON u.id = a.user_id
            WHERE a.is_active = 1 AND u.is_active = 1
            ORDER BY a.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(id, user_id, pair, kind, threshold, active, last, count, created, tg)| {
                alert_from_row((id, user_id, pair, kind, threshold, active, last, count, created))
                    .map(|alert| ActiveAlert {
                        alert,
                        telegram_id: tg,
                    })
            })
            .collect())
    }

    /// Advance `last_triggered` and `trigger_count` after a delivered notification.
    pub async fn mark_alert_triggered(&self, alert_id: i64) -> Result<(), DbError> {
        sqlx::query(
            "UPDATE user_alerts SET last_triggered = ?, trigger_count = trigger_count + 1 WHERE id = ?",
        )
        .bind(self.now_ms())
        .bind(alert_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a dispatch attempt.
    pub async fn log_alert(&self, entry: &AlertLogEntry) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO alert_log (user_id, alert_id, pair, message, price, price_change, delivered, sent_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.user_id)
        .bind(entry.alert_id)
        .bind(&entry.pair)
        .bind(&entry.message)
        .bind(entry.price)
        .bind(entry.price_change)
        .bind(entry.delivered)
        .bind(self.now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// `(attempted, delivered)` dispatch counts for an alert.
    pub async fn alert_attempts(&self, alert_id: i64) -> Result<(i64, i64), DbError> {
        let (attempted, delivered) = sqlx::query_as::<_, (i64, i64)>(
            "SELECT COUNT(*), COALESCE(SUM(delivered), 0) FROM alert_log WHERE alert_id = ?",
        )
        .bind(alert_id)
        .fetch_one(&self.pool)
        .await?;
        Ok((attempted, delivered))
    }

    // === Subscriptions ===

    /// Subscribe, re-activating an earlier subscription to the same pair.
    pub async fn subscribe(&self, user_id: i64, pair: &str) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO user_subscriptions (user_id, pair, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id, pair) DO UPDATE SET is_active = 1
            "#,
        )
        .bind(user_id)
        .bind(pair.to_uppercase())
        .bind(self.now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn unsubscribe(&self, user_id: i64, pair: &str) -> Result<bool, DbError> {
        let result = sqlx::query(
            "UPDATE user_subscriptions SET is_active = 0 WHERE user_id = ? AND pair = ? AND is_active = 1",
        )
        .bind(user_id)
        .bind(pair.to_uppercase())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_subscriptions(&self, user_id: i64) -> Result<Vec<String>, DbError> {
        let pairs = sqlx::query_scalar::<_, String>(
            "SELECT pair FROM user_subscriptions WHERE user_id = ? AND is_active = 1 ORDER BY pair",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(pairs)
    }

    /// Chat ids of active users subscribed to `pair`.
    pub async fn get_pair_subscribers(&self, pair: &str) -> Result<Vec<i64>, DbError> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT u.telegram_id FROM user_subscriptions s
            JOIN users u ON u.id = s.user_id
            WHERE s.pair = ? AND s.is_active = 1 AND u.is_active = 1
            ORDER BY u.telegram_id
            "#,
        )
        .bind(pair.to_uppercase())
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// `(chat id, pair)` for every active subscription of an active user.
    pub async fn active_subscriptions(&self) -> Result<Vec<(i64, String)>, DbError> {
        let rows = sqlx::query_as::<_, (i64, String)>(
            r#"
            SELECT u.telegram_id, s.pair FROM user_subscriptions s
            JOIN users u ON u.id = s.user_id
            WHERE s.is_active = 1 AND u.is_active = 1
            ORDER BY u.telegram_id, s.pair
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn stats(&self) -> Result<DbStats, DbError> {
        let since = (self.clock.now() - Duration::hours(24)).timestamp_millis();
        let (users, active_alerts, active_subscriptions, price_records, alerts_delivered_24h) =
            sqlx::query_as::<_, (i64, i64, i64, i64, i64)>(
                r#"
                SELECT
                    (SELECT COUNT(*) FROM users WHERE is_active = 1),
                    (SELECT COUNT(*) FROM user_alerts WHERE is_active = 1),
                    (SELECT COUNT(*) FROM user_subscriptions WHERE is_active = 1),
                    (SELECT COUNT(*) FROM price_history),
                    (SELECT COUNT(*) FROM alert_log WHERE delivered = 1 AND sent_at >= ?)
                "#,
            )
            .bind(since)
            .fetch_one(&self.pool)
            .await?;
        Ok(DbStats {
            users,
            active_alerts,
            active_subscriptions,
            price_records,
            alerts_delivered_24h,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use nicp_core::ManualClock;
    use pretty_assertions::assert_eq;

    async fn db_at(clock: Arc<ManualClock>) -> Database {
        Database::connect_with_clock("sqlite::memory:", clock)
            .await
            .unwrap()
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap(),
        ))
    }

    fn user(telegram_id: i64) -> NewUser {
        NewUser {
            telegram_id,
            username: Some("trader".into()),
            first_name: Some("Sam".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_register_user() {
        let clock = clock();
        let db = db_at(clock.clone()).await;
        let profile = db.register_user(&user(123456789)).await.unwrap();
        assert_eq!(profile.telegram_id, 123456789);
        assert_eq!(profile.referral_code, "ICP6789");
        assert!(profile.is_active);

        clock.advance(Duration::minutes(5));
        let again = db.register_user(&user(123456789)).await.unwrap();
        assert_eq!(again.id, profile.id);
        assert_eq!(again.created_at, profile.created_at);
        assert!(again.last_activity > profile.last_activity);
    }

    #[tokio::test]
    async fn test_percent_change_needs_two_observations() {
        let clock = clock();
        let db = db_at(clock.clone()).await;
        assert_eq!(db.percent_change("NICP/ICP", Source::IcpSwap, 24).await.unwrap(), None);

        db.record_price("NICP/ICP", 0.95, Some(1000.0), Source::IcpSwap, None)
            .await
            .unwrap();
        assert_eq!(db.percent_change("NICP/ICP", Source::IcpSwap, 24).await.unwrap(), None);

        clock.advance(Duration::hours(1));
        db.record_price("NICP/ICP", 0.97, None, Source::IcpSwap, None)
            .await
            .unwrap();
        let change = db.percent_change("NICP/ICP", Source::IcpSwap, 24).await.unwrap().unwrap();
        assert!((change - 2.105).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_percent_change_ignores_old_observations() {
        let clock = clock();
        let db = db_at(clock.clone()).await;
        db.record_price("NICP/ICP", 0.50, None, Source::IcpSwap, None)
            .await
            .unwrap();
        clock.advance(Duration::hours(30));
        db.record_price("NICP/ICP", 0.95, None, Source::IcpSwap, None)
            .await
            .unwrap();
        assert_eq!(db.percent_change("NICP/ICP", Source::IcpSwap, 24).await.unwrap(), None);
    }

    fn nicp_quote(price: f64, source: Source) -> PricePair {
        PricePair {
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
        }
    }

    #[tokio::test]
    async fn test_percent_change_keeps_sources_apart() {
        let clock = clock();
        let db = db_at(clock.clone()).await;

        // both DEXes quote the pair in the same tick at different prices
        db.record_pairs([
            &nicp_quote(0.97, Source::IcpSwap),
            &nicp_quote(0.99, Source::KongSwap),
        ])
        .await
        .unwrap();
        assert_eq!(db.percent_change("NICP/ICP", Source::IcpSwap, 24).await.unwrap(), None);
        assert_eq!(db.percent_change("NICP/ICP", Source::KongSwap, 24).await.unwrap(), None);

        clock.advance(Duration::minutes(30));
        db.record_pairs([
            &nicp_quote(0.97, Source::IcpSwap),
            &nicp_quote(0.99, Source::KongSwap),
        ])
        .await
        .unwrap();
        assert_eq!(
            db.percent_change("NICP/ICP", Source::IcpSwap, 24).await.unwrap(),
            Some(0.0)
        );
        assert_eq!(
            db.percent_change("NICP/ICP", Source::KongSwap, 24).await.unwrap(),
            Some(0.0)
        );
    }

    #[tokio::test]
    async fn test_percent_change_uses_earliest_in_window_against_latest() {
        let clock = clock();
        let db = db_at(clock.clone()).await;
        for (i, price) in [0.50, 0.80, 0.90, 1.00, 0.99].into_iter().enumerate() {
            if i > 0 {
                clock.advance(Duration::hours(10));
            }
            db.record_price("NICP/ICP", price, None, Source::IcpSwap, None)
                .await
                .unwrap();
        }
        // window of 24h now covers the rows at 0.90 (t=20h), 1.00 (t=30h) and 0.99 (t=40h)
        let change = db
            .percent_change("NICP/ICP", Source::IcpSwap, 24)
            .await
            .unwrap()
            .unwrap();
        assert!((change - 10.0).abs() < 1e-9, "change {change}");
    }

    #[tokio::test]
    async fn test_timestamps_never_go_backwards() {
        let clock = clock();
        let db = db_at(clock.clone()).await;
        db.record_price("ICP/CKUSDT", 4.8, None, Source::KongSwap, None)
            .await
            .unwrap();
        clock.advance(Duration::minutes(-10));
        db.record_price("ICP/CKUSDT", 4.9, None, Source::KongSwap, None)
            .await
            .unwrap();

        clock.advance(Duration::minutes(10));
        let history = db.price_history("ICP/CKUSDT", 1).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].timestamp <= history[1].timestamp);
        assert_eq!(history[1].price, 4.9);
    }

    #[tokio::test]
    async fn test_record_pairs_and_latest() {
        let db = db_at(clock()).await;
        let pair = PricePair {
            pair_name: "NICP/ICP".into(),
            base: "NICP".into(),
            quote: "ICP".into(),
            base_id: "b".into(),
            quote_id: "q".into(),
            price: 0.979,
            volume_24h_usd: 50_000.0,
            liquidity_usd: 200_000.0,
            source: Source::IcpSwap,
            raw_payload: serde_json::json!({"last_price": "0.979"}),
        };
        assert_eq!(db.record_pairs([&pair]).await.unwrap(), 1);

        let latest = db.latest_price("NICP/ICP").await.unwrap().unwrap();
        assert_eq!(latest.price, 0.979);
        assert_eq!(latest.source, Source::IcpSwap);
        assert_eq!(latest.volume_24h, Some(50_000.0));
        assert!(latest.raw_data.unwrap().contains("0.979"));
    }

    #[tokio::test]
    async fn test_cleanup_old_history() {
        let clock = clock();
        let db = db_at(clock.clone()).await;
        db.record_price("NICP/ICP", 0.97, None, Source::IcpSwap, None)
            .await
            .unwrap();
        clock.advance(Duration::days(31));
        db.record_price("NICP/ICP", 0.98, None, Source::IcpSwap, None)
            .await
            .unwrap();

        assert_eq!(db.cleanup_old_history(30).await.unwrap(), 1);
        assert_eq!(db.stats().await.unwrap().price_records, 1);
    }

    #[tokio::test]
    async fn test_alert_lifecycle() {
        let db = db_at(clock()).await;
        let user_id = db.register_user(&user(42)).await.unwrap().id;
        let alert_id = db
            .create_alert(user_id, "nicp/icp", AlertType::PriceDown, 5.0)
            .await
            .unwrap();

        let alerts = db.get_user_alerts(user_id).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].pair, "NICP/ICP");
        assert_eq!(alerts[0].trigger_count, 0);

        let active = db.get_active_alerts().await.unwrap();
        assert_eq!(active[0].telegram_id, 42);

        db.mark_alert_triggered(alert_id).await.unwrap();
        let alert = db.get_alert(alert_id).await.unwrap().unwrap();
        assert_eq!(alert.trigger_count, 1);
        assert!(alert.last_triggered.is_some());

        assert!(db.deactivate_alert(user_id, alert_id).await.unwrap());
        assert!(!db.deactivate_alert(user_id, alert_id).await.unwrap());
        assert!(db.get_active_alerts().await.unwrap().is_empty());
        // deactivated, not deleted
        assert!(db.get_alert(alert_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_deactivate_requires_owner() {
        let db = db_at(clock()).await;
        let owner = db.register_user(&user(1)).await.unwrap().id;
        let other = db.register_user(&user(2)).await.unwrap().id;
        let alert_id = db
            .create_alert(owner, "NICP/ICP", AlertType::PriceUp, 3.0)
            .await
            .unwrap();
        assert!(!db.deactivate_alert(other, alert_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_subscriptions() {
        let db = db_at(clock()).await;
        let user_id = db.register_user(&user(7)).await.unwrap().id;
        db.subscribe(user_id, "nicp/icp").await.unwrap();
        db.subscribe(user_id, "NICP/ICP").await.unwrap();
        assert_eq!(db.get_subscriptions(user_id).await.unwrap(), vec!["NICP/ICP"]);
        assert_eq!(db.get_pair_subscribers("NICP/ICP").await.unwrap(), vec![7]);

        assert!(db.unsubscribe(user_id, "NICP/ICP").await.unwrap());
        assert!(db.get_subscriptions(user_id).await.unwrap().is_empty());

        db.subscribe(user_id, "NICP/ICP").await.unwrap();
        assert_eq!(db.stats().await.unwrap().active_subscriptions, 1);
    }

    #[tokio::test]
    async fn test_alert_log_counts() {
        let db = db_at(clock()).await;
        let user_id = db.register_user(&user(9)).await.unwrap().id;
        let alert_id = db
            .create_alert(user_id, "NICP/ICP", AlertType::PriceUp, 1.0)
            .await
            .unwrap();
        for delivered in [false, true] {
            db.log_alert(&AlertLogEntry {
                user_id,
                alert_id: Some(alert_id),
                pair: "NICP/ICP".into(),
                message: "up".into(),
                price: 0.99,
                price_change: 2.0,
                delivered,
            })
            .await
            .unwrap();
        }
        assert_eq!(db.alert_attempts(alert_id).await.unwrap(), (2, 1));
        assert_eq!(db.stats().await.unwrap().alerts_delivered_24h, 1);
    }
}
