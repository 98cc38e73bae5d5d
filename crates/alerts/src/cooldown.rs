//! Per-(user, pair, alert type) notification cooldown.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use nicp_core::{AlertType, Clock, SystemClock};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CooldownKey {
    pub user_id: i64,
    pub pair: String,
    pub alert_type: AlertType,
}

impl CooldownKey {
    pub fn new(user_id: i64, pair: impl Into<String>, alert_type: AlertType) -> Self {
        Self {
            user_id,
            pair: pair.into(),
            alert_type,
        }
    }
}

/// Remembers when each key last notified and suppresses repeats within the window.
pub struct CooldownTracker {
    last_sent: DashMap<CooldownKey, DateTime<Utc>>,
    window: Duration,
    clock: Arc<dyn Clock>,
}

impl CooldownTracker {
    pub fn new(window: Duration) -> Self {
        Self::with_clock(window, Arc::new(SystemClock))
    }

    pub fn with_clock(window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            last_sent: DashMap::new(),
            window,
            clock,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// True while less than `window` has elapsed since the last mark.
    pub fn is_cooling(&self, key: &CooldownKey) -> bool {
        self.last_sent
            .get(key)
            .map(|at| self.clock.now() - *at < self.window)
            .unwrap_or(false)
    }

    pub fn mark(&self, key: CooldownKey) {
        self.last_sent.insert(key, self.clock.now());
    }

    /// Drop entries whose window has passed. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.last_sent.len();
        self.last_sent.retain(|_, at| now - *at < self.window);
        before - self.last_sent.len()
    }

    pub fn len(&self) -> usize {
        self.last_sent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_sent.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use nicp_core::ManualClock;

    fn tracker() -> (CooldownTracker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap(),
        ));
        (
            CooldownTracker::with_clock(Duration::seconds(300), clock.clone()),
            clock,
        )
    }

    #[test]
    fn test_window_expires() {
        let (tracker, clock) = tracker();
        let key = CooldownKey::new(1, "NICP/ICP", AlertType::PriceUp);
        assert!(!tracker.is_cooling(&key));

        tracker.mark(key.clone());
        clock.advance(Duration::seconds(299));
        assert!(tracker.is_cooling(&key));

        clock.advance(Duration::seconds(1));
        assert!(!tracker.is_cooling(&key));
    }

    #[test]
    fn test_keys_are_independent() {
        let (tracker, _) = tracker();
        tracker.mark(CooldownKey::new(1, "NICP/ICP", AlertType::PriceUp));
        assert!(!tracker.is_cooling(&CooldownKey::new(1, "NICP/ICP", AlertType::PriceDown)));
        assert!(!tracker.is_cooling(&CooldownKey::new(2, "NICP/ICP", AlertType::PriceUp)));
        assert!(!tracker.is_cooling(&CooldownKey::new(1, "ICP/CKUSDT", AlertType::PriceUp)));
    }

    #[test]
    fn test_purge_expired() {
        let (tracker, clock) = tracker();
        tracker.mark(CooldownKey::new(1, "NICP/ICP", AlertType::PriceUp));
        clock.advance(Duration::seconds(200));
        tracker.mark(CooldownKey::new(2, "NICP/ICP", AlertType::PriceUp));
        clock.advance(Duration::seconds(150));

        assert_eq!(tracker.purge_expired(), 1);
        assert_eq!(tracker.len(), 1);
    }
}
