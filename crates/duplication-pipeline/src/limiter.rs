//! The update-rate limiter.

use core::time::Duration;
use std::time::Instant;

/// Fixed frame-rate steps for the limiter.
///
/// Each step maps to an empirically tuned frame time rather than a naive
/// `1s / fps`; at higher rates the acquire/copy/publish latencies compound
/// and the naive value undershoots the requested rate noticeably.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FpsLimit {
    /// 1 frame per second.
    Fps1,
    /// 2 frames per second.
    Fps2,
    /// 5 frames per second.
    Fps5,
    /// 10 frames per second.
    Fps10,
    /// 15 frames per second.
    Fps15,
    /// 20 frames per second.
    Fps20,
    /// 25 frames per second.
    Fps25,
    /// 30 frames per second.
    Fps30,
    /// 40 frames per second.
    Fps40,
    /// 50 frames per second.
    Fps50,
    /// 60 frames per second.
    Fps60,
    /// 75 frames per second.
    Fps75,
    /// 90 frames per second.
    Fps90,
    /// 120 frames per second.
    Fps120,
    /// 144 frames per second.
    Fps144,
}

impl FpsLimit {
    /// The tuned minimum frame time for this step.
    pub const fn frame_time(self) -> Duration {
        let micros = match self {
            Self::Fps1 => 985_000,
            Self::Fps2 => 485_000,
            Self::Fps5 => 188_000,
            Self::Fps10 => 95_000,
            Self::Fps15 => 62_000,
            Self::Fps20 => 46_000,
            Self::Fps25 => 36_500,
            Self::Fps30 => 30_500,
            Self::Fps40 => 22_500,
            Self::Fps50 => 17_500,
            Self::Fps60 => 14_500,
            Self::Fps75 => 11_500,
            Self::Fps90 => 9_500,
            Self::Fps120 => 7_000,
            Self::Fps144 => 5_800,
        };
        Duration::from_micros(micros)
    }
}

/// The global limiter setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateLimitMode {
    /// No limit; every frame is published.
    #[default]
    Off,
    /// An explicit minimum interval in milliseconds.
    Milliseconds(u32),
    /// A fixed frame-rate step.
    FramesPerSecond(FpsLimit),
}

impl UpdateLimitMode {
    /// The minimum interval between accepted publishes for this mode.
    pub const fn min_interval(self) -> Duration {
        match self {
            Self::Off => Duration::ZERO,
            Self::Milliseconds(ms) => Duration::from_millis(ms as u64),
            Self::FramesPerSecond(fps) => fps.frame_time(),
        }
    }
}

/// Computes and applies the minimum delay between accepted frame publishes.
///
/// The effective interval is recomputed once per settings or visibility
/// change, not per frame: the global mode combined with every visible
/// consumer's override. The first override encountered always wins over the
/// global value; subsequent overrides win only when stricter (longer).
///
/// Frames arriving before the interval has elapsed are marked "skipped" by
/// the caller; their dirty region is deferred, never dropped. Mouse-only
/// updates are not subject to the limiter, only full redraws.
#[derive(Debug, Clone, Copy)]
pub struct UpdateLimiter {
    min_interval: Duration,
}

impl UpdateLimiter {
    /// Create a limiter with no active limit.
    pub const fn new() -> Self {
        Self {
            min_interval: Duration::ZERO,
        }
    }

    /// The current effective minimum publish interval.
    pub const fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Recompute the effective interval from the global mode and the
    /// overrides of every currently visible consumer sourcing this pipeline.
    pub fn recompute<I>(&mut self, global: UpdateLimitMode, overrides: I)
    where
        I: IntoIterator<Item = Duration>,
    {
        let mut interval = global.min_interval();
        let mut override_seen = false;

        for candidate in overrides {
            if !override_seen || candidate > interval {
                interval = candidate;
            }
            override_seen = true;
        }

        self.min_interval = interval;
    }

    /// Whether a full redraw requested at `now` should be skipped because the
    /// previous accepted publish at `last_publish` is still too recent.
    pub fn should_skip(&self, last_publish: Instant, now: Instant) -> bool {
        !self.min_interval.is_zero() && now.duration_since(last_publish) < self.min_interval
    }
}

impl Default for UpdateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn off_never_skips() {
        let limiter = UpdateLimiter::new();
        let start = Instant::now();
        assert!(!limiter.should_skip(start, start));
    }

    #[test]
    fn first_override_beats_global_even_when_looser() {
        let mut limiter = UpdateLimiter::new();
        limiter.recompute(
            UpdateLimitMode::Milliseconds(100),
            [Duration::from_millis(20)],
        );
        assert_eq!(limiter.min_interval(), Duration::from_millis(20));
    }

    #[test]
    fn later_overrides_win_only_when_stricter() {
        let mut limiter = UpdateLimiter::new();
        limiter.recompute(
            UpdateLimitMode::Off,
            [
                Duration::from_millis(20),
                Duration::from_millis(10),
                Duration::from_millis(50),
            ],
        );
        assert_eq!(limiter.min_interval(), Duration::from_millis(50));
    }

    #[test]
    fn fps_steps_use_tuned_frame_times() {
        let mut limiter = UpdateLimiter::new();
        limiter.recompute(
            UpdateLimitMode::FramesPerSecond(FpsLimit::Fps30),
            core::iter::empty(),
        );
        assert_eq!(limiter.min_interval(), Duration::from_micros(30_500));
    }

    #[test]
    fn elapsed_interval_accepts_the_frame() {
        let mut limiter = UpdateLimiter::new();
        limiter.recompute(
            UpdateLimitMode::FramesPerSecond(FpsLimit::Fps30),
            core::iter::empty(),
        );

        let start = Instant::now();
        assert!(limiter.should_skip(start, start + Duration::from_millis(5)));
        assert!(!limiter.should_skip(start, start + Duration::from_millis(40)));
    }
}
