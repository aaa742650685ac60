//! Rate-limit window for the authoritative lane.
//!
//! Clear → Limited happens only when the authoritative source reports a reset
//! time. Limited → Clear has no event: the window is clear whenever
//! `now >= reset_at`, checked against the wall clock on every read.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Process-wide rate-limit state.
#[derive(Debug, Default)]
pub struct RateLimitWindow {
    reset_at: Mutex<Option<DateTime<Utc>>>,
}

impl RateLimitWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reset time reported by the source. The latest report wins.
    pub fn note(&self, reset_at: DateTime<Utc>) {
        *self.reset_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(reset_at);
    }

    /// Last reported reset time, whether or not it has passed.
    pub fn reset_at(&self) -> Option<DateTime<Utc>> {
        *self.reset_at.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_limited(&self, now: DateTime<Utc>) -> bool {
        self.remaining(now).is_some()
    }

    /// Time left until the window clears, if it is still active.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let reset_at = self.reset_at()?;
        if now >= reset_at {
            return None;
        }
        (reset_at - now).to_std().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_clear_without_signal() {
        let window = RateLimitWindow::new();
        assert!(!window.is_limited(Utc::now()));
        assert!(window.reset_at().is_none());
    }

    #[test]
    fn test_limited_until_reset() {
        let now = Utc::now();
        let window = RateLimitWindow::new();
        window.note(now + ChronoDuration::seconds(90));

        assert!(window.is_limited(now));
        assert_eq!(window.remaining(now), Some(Duration::from_secs(90)));
        assert!(window.is_limited(now + ChronoDuration::seconds(89)));
    }

    #[test]
    fn test_clears_exactly_at_reset() {
        let now = Utc::now();
        let window = RateLimitWindow::new();
        let reset = now + ChronoDuration::seconds(30);
        window.note(reset);

        assert!(!window.is_limited(reset));
        assert!(!window.is_limited(reset + ChronoDuration::hours(5)));
        // The stored timestamp stays for status reporting.
        assert_eq!(window.reset_at(), Some(reset));
    }

    #[test]
    fn test_reset_in_the_past_is_clear() {
        let now = Utc::now();
        let window = RateLimitWindow::new();
        window.note(now - ChronoDuration::seconds(1));
        assert!(!window.is_limited(now));
    }
}
