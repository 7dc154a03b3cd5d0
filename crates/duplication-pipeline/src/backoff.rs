//! Progressive sleep between pipeline rebuild attempts.

use core::time::Duration;
use std::{thread, time::Instant};

use tracing::debug;
use utilities::display_duration;

/// How far apart two waits may be while still belonging to one incident.
const INCIDENT_WINDOW: Duration = Duration::from_secs(2);

struct Band {
    sleep: Duration,
    max_waits: u32,
}

/// The escalation ladder. The final band never advances further, so retries
/// continue forever at a bounded rate during prolonged outages.
const BANDS: &[Band] = &[
    Band {
        sleep: Duration::from_millis(10),
        max_waits: 40,
    },
    Band {
        sleep: Duration::from_millis(50),
        max_waits: 20,
    },
    Band {
        sleep: Duration::from_millis(250),
        max_waits: 20,
    },
    Band {
        sleep: Duration::from_millis(2000),
        max_waits: 60,
    },
    Band {
        sleep: Duration::from_millis(5000),
        max_waits: u32::MAX,
    },
];

/// Stateful progressive backoff for expected-error retries.
///
/// Each [`TransitionBackoff::wait`] sleeps for the current band's duration.
/// Repeated waits inside one incident window escalate through the bands; a
/// gap longer than the window starts a new incident back at the first band.
/// This keeps single-shot transients (a momentary desktop switch) responsive
/// at 10ms while bounding retry-storm CPU and log spam when a driver is stuck
/// for minutes.
pub struct TransitionBackoff {
    band: usize,
    waits_in_band: u32,
    last_wake: Option<Instant>,
}

impl TransitionBackoff {
    /// Create a backoff at the first band.
    pub const fn new() -> Self {
        Self {
            band: 0,
            waits_in_band: 0,
            last_wake: None,
        }
    }

    /// Sleep for the current band's duration, escalating or resetting first.
    pub fn wait(&mut self) {
        let sleep = self.advance(Instant::now());
        debug!("Retrying in {}", display_duration(sleep));
        thread::sleep(sleep);
        self.last_wake = Some(Instant::now());
    }

    /// Pick the sleep duration for a wait issued at `now` and update the
    /// escalation state. Separated from the sleep itself so the ladder can be
    /// exercised without real time passing.
    fn advance(&mut self, now: Instant) -> Duration {
        match self.last_wake {
            Some(last_wake) if now.duration_since(last_wake) > INCIDENT_WINDOW => {
                // New incident.
                self.band = 0;
                self.waits_in_band = 0;
            }
            Some(_) => {
                if self.waits_in_band >= BANDS[self.band].max_waits && self.band + 1 < BANDS.len() {
                    self.band += 1;
                    self.waits_in_band = 0;
                }
            }
            None => {}
        }

        self.waits_in_band += 1;
        BANDS[self.band].sleep
    }
}

impl Default for TransitionBackoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drive the ladder with a synthetic clock that keeps every wait inside
    /// the incident window.
    fn drive(backoff: &mut TransitionBackoff, now: &mut Instant, count: usize) -> Vec<Duration> {
        let mut sleeps = Vec::with_capacity(count);
        for _ in 0..count {
            let sleep = backoff.advance(*now);
            *now += sleep + Duration::from_millis(1);
            backoff.last_wake = Some(*now);
            sleeps.push(sleep);
        }
        sleeps
    }

    #[test]
    fn sleep_never_decreases_within_an_incident() {
        let mut backoff = TransitionBackoff::new();
        let mut now = Instant::now();

        let sleeps = drive(&mut backoff, &mut now, 200);
        for pair in sleeps.windows(2) {
            assert!(pair[1] >= pair[0], "{:?} decreased to {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn ladder_escalates_at_band_caps() {
        let mut backoff = TransitionBackoff::new();
        let mut now = Instant::now();

        let sleeps = drive(&mut backoff, &mut now, 41);
        assert_eq!(sleeps[0], Duration::from_millis(10));
        assert_eq!(sleeps[39], Duration::from_millis(10));
        assert_eq!(sleeps[40], Duration::from_millis(50));
    }

    #[test]
    fn final_band_stays_constant() {
        let mut backoff = TransitionBackoff::new();
        let mut now = Instant::now();

        // Walk well past the last escalation point.
        let sleeps = drive(&mut backoff, &mut now, 160);
        assert_eq!(*sleeps.last().unwrap(), Duration::from_millis(5000));

        let more = drive(&mut backoff, &mut now, 20);
        assert!(more.iter().all(|s| *s == Duration::from_millis(5000)));
    }

    #[test]
    fn gap_beyond_window_resets_to_first_band() {
        let mut backoff = TransitionBackoff::new();
        let mut now = Instant::now();

        drive(&mut backoff, &mut now, 100);
        assert!(backoff.band > 0);

        now += INCIDENT_WINDOW + Duration::from_millis(1);
        assert_eq!(backoff.advance(now), Duration::from_millis(10));
    }
}
