//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Timestamp arithmetic and clamped query windows."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Smallest accepted window separation, in minutes.
pub const MIN_SEPARATION_MINUTES: i64 = 1;
/// Largest accepted window separation (30 days), in minutes.
pub const MAX_SEPARATION_MINUTES: i64 = 30 * 24 * 60;
/// Separation applied when the requested one is out of range.
pub const DEFAULT_SEPARATION_MINUTES: i64 = 60;

/// Absolute gap between two timestamps, at millisecond resolution.
pub fn epoch_millis_delta(a: DateTime<Utc>, b: DateTime<Utc>) -> Duration {
    let delta = a.timestamp_millis().abs_diff(b.timestamp_millis());
    Duration::from_millis(delta)
}

/// Clamp a separation request into the accepted range, falling back to the default.
pub fn clamp_separation_minutes(minutes: i64) -> i64 {
    if (MIN_SEPARATION_MINUTES..=MAX_SEPARATION_MINUTES).contains(&minutes) {
        minutes
    } else {
        DEFAULT_SEPARATION_MINUTES
    }
}

/// Inclusive time range used to query recorded telemetry.
///
/// Construction never fails: `end` is capped at now, `start` at `end`, and the
/// separation falls back to [`DEFAULT_SEPARATION_MINUTES`] when out of range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    separation_minutes: i64,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, separation_minutes: i64) -> Self {
        let end = end.min(Utc::now());
        let start = start.min(end);
        Self {
            start,
            end,
            separation_minutes: clamp_separation_minutes(separation_minutes),
        }
    }

    /// Window ending now and reaching back `separation_minutes` (clamped).
    pub fn trailing(separation_minutes: i64) -> Self {
        let minutes = clamp_separation_minutes(separation_minutes);
        let end = Utc::now();
        let start = end - chrono::Duration::minutes(minutes);
        Self {
            start,
            end,
            separation_minutes: minutes,
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn separation_minutes(&self) -> i64 {
        self.separation_minutes
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn delta_is_symmetric() {
        let a = Utc.timestamp_millis_opt(1_000).unwrap();
        let b = Utc.timestamp_millis_opt(3_500).unwrap();
        assert_eq!(epoch_millis_delta(a, b), Duration::from_millis(2_500));
        assert_eq!(epoch_millis_delta(b, a), Duration::from_millis(2_500));
    }

    #[test]
    fn out_of_range_separation_falls_back_to_default() {
        assert_eq!(clamp_separation_minutes(0), DEFAULT_SEPARATION_MINUTES);
        assert_eq!(clamp_separation_minutes(-5), DEFAULT_SEPARATION_MINUTES);
        assert_eq!(
            clamp_separation_minutes(MAX_SEPARATION_MINUTES + 1),
            DEFAULT_SEPARATION_MINUTES
        );
        assert_eq!(clamp_separation_minutes(15), 15);
    }

    #[test]
    fn window_caps_end_at_now_and_start_at_end() {
        let future = Utc::now() + chrono::Duration::days(2);
        let window = TimeWindow::new(future, future, 10);
        assert!(window.end() <= Utc::now());
        assert_eq!(window.start(), window.end());
        assert_eq!(window.separation_minutes(), 10);
    }

    #[test]
    fn trailing_window_contains_recent_instants() {
        let window = TimeWindow::trailing(5);
        assert!(window.contains(Utc::now() - chrono::Duration::minutes(1)));
        assert!(!window.contains(Utc::now() - chrono::Duration::minutes(10)));
    }
}
