//! Cooldown window for outbound notifications.
//!
//! At most one notification per window, however often breaches occur. The
//! throttler never records a send on its own: the caller calls
//! `record_sent` only after the transport reported success, so a failed
//! send leaves the window open.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone)]
pub struct NotificationThrottler {
    window: TimeDelta,
    last_notified_at: Option<DateTime<Utc>>,
}

impl Default for NotificationThrottler {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl NotificationThrottler {
    pub fn new(window: Duration) -> Self {
        Self {
            window: TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX),
            last_notified_at: None,
        }
    }

    pub fn should_notify(&self, now: DateTime<Utc>) -> bool {
        match self.last_notified_at {
            None => true,
            Some(last) => now.signed_duration_since(last) >= self.window,
        }
    }

    pub fn record_sent(&mut self, at: DateTime<Utc>) {
        self.last_notified_at = Some(at);
    }

    pub fn last_notified_at(&self) -> Option<DateTime<Utc>> {
        self.last_notified_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn first_breach_always_notifies() {
        let th = NotificationThrottler::default();
        assert!(th.should_notify(t0()));
        assert_eq!(th.last_notified_at(), None);
    }

    #[test]
    fn window_boundary_is_inclusive() {
        let mut th = NotificationThrottler::default();
        th.record_sent(t0());
        let almost = t0() + TimeDelta::minutes(29) + TimeDelta::seconds(59);
        assert!(!th.should_notify(almost));
        assert!(th.should_notify(t0() + TimeDelta::minutes(30)));
    }

    #[test]
    fn checking_does_not_advance_state() {
        let th = NotificationThrottler::default();
        assert!(th.should_notify(t0()));
        assert!(th.should_notify(t0() + TimeDelta::seconds(5)));
    }

    #[test]
    fn clock_going_backwards_stays_quiet() {
        let mut th = NotificationThrottler::new(Duration::from_secs(60));
        th.record_sent(t0());
        assert!(!th.should_notify(t0() - TimeDelta::minutes(5)));
    }
}
