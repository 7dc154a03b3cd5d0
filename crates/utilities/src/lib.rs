//! Small shared helpers.

use core::time::Duration;
use std::time::Instant;

use tracing::debug;

/// Display the duration as a string with units. Display is handled in the folloing order:
/// 1. `>= 10s` displays seconds only.
/// 1. `>= 1s` displays seconds with 1dp.
/// 1. `>= 1ms` displays milliseconds only.
/// 1. `>= 1µs` displays microseconds only.
/// 1. `< 1µs` displays nanoseconds only.
#[inline]
pub fn display_duration(duration: Duration) -> String {
    if duration.as_secs() >= 10 {
        format!("{}s", duration.as_secs())
    } else if duration.as_secs() >= 1 {
        format!("{:.1}s", duration.as_secs_f32())
    } else if duration.as_millis() >= 1 {
        format!("{}ms", duration.as_millis())
    } else if duration.as_micros() >= 1 {
        format!("{}µs", duration.as_micros())
    } else {
        format!("{}ns", duration.as_nanos())
    }
}

/// Counts events and periodically logs the rate, for tracking how many frame
/// publishes actually reach the screen.
pub struct FrameRateTracker {
    label: &'static str,
    report_interval: Duration,
    window_start: Instant,
    count: u32,
}

impl FrameRateTracker {
    /// Create a tracker that logs `label` at most once per `report_interval`.
    pub fn new(label: &'static str, report_interval: Duration) -> Self {
        Self {
            label,
            report_interval,
            window_start: Instant::now(),
            count: 0,
        }
    }

    /// Record one event at `now`, logging the rate when the window elapsed.
    pub fn record(&mut self, now: Instant) {
        self.count += 1;

        let elapsed = now.duration_since(self.window_start);
        if elapsed >= self.report_interval {
            let rate = f64::from(self.count) / elapsed.as_secs_f64();
            debug!("[Rate] {}: {rate:.1}/s", self.label);

            self.window_start = now;
            self.count = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_units_follow_magnitude() {
        assert_eq!(display_duration(Duration::from_secs(12)), "12s");
        assert_eq!(display_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(display_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(display_duration(Duration::from_micros(42)), "42µs");
        assert_eq!(display_duration(Duration::from_nanos(7)), "7ns");
    }

    #[test]
    fn tracker_resets_its_window() {
        let mut tracker = FrameRateTracker::new("test", Duration::from_millis(1));
        let start = Instant::now();
        tracker.record(start + Duration::from_millis(2));
        assert_eq!(tracker.count, 0, "window must reset after a report");
    }
}
