//! Cross-thread pipeline signalling.
//!
//! A single state machine replaces the raw manual/auto-reset event pairs the
//! capture loop would otherwise juggle: run state (running/paused/
//! terminating), the "new frame processed" flag, a one-shot error latch and
//! the full-refresh request all live behind one mutex and condition variable.
//! The termination transition always wakes paused waiters, so shutdown can
//! never be stalled by a paused worker.

use core::time::Duration;

use parking_lot::{Condvar, Mutex};

/// The pipeline's run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Workers capture frames.
    Running,
    /// Workers block until resumed; used when no consumer needs frames.
    Paused,
    /// Workers exit at the next loop iteration.
    Terminating,
}

/// Which kind of failure a worker reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSignal {
    /// A known transition; the supervisor unwinds and retries the pipeline.
    Expected,
    /// Fatal; the supervisor terminates the pipeline.
    Unexpected,
}

/// What woke the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorWake {
    /// A worker or the arbitration routine reported a failure.
    Error(ErrorSignal),
    /// Shutdown was requested.
    Terminated,
}

#[derive(Debug)]
struct SignalState {
    run: RunState,
    new_frame: bool,
    error: Option<ErrorSignal>,
    full_refresh: bool,
}

/// Shared signalling block for one pipeline run.
#[derive(Debug)]
pub struct PipelineSignals {
    state: Mutex<SignalState>,
    condvar: Condvar,
}

impl PipelineSignals {
    /// Create signals in the running state.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SignalState {
                run: RunState::Running,
                new_frame: false,
                error: None,
                full_refresh: false,
            }),
            condvar: Condvar::new(),
        }
    }

    /// The current run state.
    pub fn run_state(&self) -> RunState {
        self.state.lock().run
    }

    /// Returns whether termination has been requested. Zero-cost enough to
    /// poll at the top of every worker loop iteration.
    pub fn should_terminate(&self) -> bool {
        self.state.lock().run == RunState::Terminating
    }

    /// Pause the workers. No-op while terminating.
    pub fn pause(&self) {
        let mut state = self.state.lock();
        if state.run == RunState::Running {
            state.run = RunState::Paused;
        }
    }

    /// Resume paused workers.
    pub fn resume(&self) {
        let mut state = self.state.lock();
        if state.run == RunState::Paused {
            state.run = RunState::Running;
        }
        drop(state);
        self.condvar.notify_all();
    }

    /// Request termination and wake every waiter, paused ones included.
    pub fn terminate(&self) {
        self.state.lock().run = RunState::Terminating;
        self.condvar.notify_all();
    }

    /// Block while paused. Returns `false` when the wake-up was termination.
    pub fn wait_while_paused(&self) -> bool {
        let mut state = self.state.lock();
        while state.run == RunState::Paused {
            self.condvar.wait(&mut state);
        }
        state.run != RunState::Terminating
    }

    /// Latch a failure report. The first signal wins; later reports from
    /// other workers racing into the same teardown are dropped.
    pub fn signal_error(&self, signal: ErrorSignal) {
        let mut state = self.state.lock();
        if state.error.is_none() {
            state.error = Some(signal);
        }
        drop(state);
        self.condvar.notify_all();
    }

    /// Block until a failure is latched or termination is requested.
    pub fn wait_failure(&self) -> SupervisorWake {
        let mut state = self.state.lock();
        loop {
            if let Some(signal) = state.error {
                return SupervisorWake::Error(signal);
            }
            if state.run == RunState::Terminating {
                return SupervisorWake::Terminated;
            }
            self.condvar.wait(&mut state);
        }
    }

    /// Mark that a worker committed a frame into the shared surface.
    pub fn notify_new_frame(&self) {
        self.state.lock().new_frame = true;
        self.condvar.notify_all();
    }

    /// Wait up to `timeout` for a committed frame, consuming the flag.
    pub fn wait_new_frame(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if !state.new_frame {
            let _ = self
                .condvar
                .wait_for(&mut state, timeout);
        }
        core::mem::take(&mut state.new_frame)
    }

    /// Request that the next publish refresh the entire surface, e.g. after a
    /// resolution change.
    pub fn request_full_refresh(&self) {
        self.state.lock().full_refresh = true;
    }

    /// Consume a pending full-refresh request.
    pub fn take_full_refresh(&self) -> bool {
        core::mem::take(&mut self.state.lock().full_refresh)
    }
}

impl Default for PipelineSignals {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, time::Instant};

    use super::*;

    #[test]
    fn first_error_signal_wins() {
        let signals = PipelineSignals::new();
        signals.signal_error(ErrorSignal::Expected);
        signals.signal_error(ErrorSignal::Unexpected);

        assert_eq!(
            signals.wait_failure(),
            SupervisorWake::Error(ErrorSignal::Expected)
        );
    }

    #[test]
    fn termination_wakes_paused_waiter() {
        let signals = Arc::new(PipelineSignals::new());
        signals.pause();

        let worker = {
            let signals = Arc::clone(&signals);
            thread::spawn(move || signals.wait_while_paused())
        };

        // Give the worker time to actually block on the pause.
        thread::sleep(Duration::from_millis(50));
        signals.terminate();

        assert!(!worker.join().unwrap(), "wake must report termination");
    }

    #[test]
    fn resume_wakes_paused_waiter() {
        let signals = Arc::new(PipelineSignals::new());
        signals.pause();

        let worker = {
            let signals = Arc::clone(&signals);
            thread::spawn(move || signals.wait_while_paused())
        };

        thread::sleep(Duration::from_millis(50));
        signals.resume();

        assert!(worker.join().unwrap());
    }

    #[test]
    fn new_frame_flag_is_consumed() {
        let signals = PipelineSignals::new();
        signals.notify_new_frame();

        assert!(signals.wait_new_frame(Duration::ZERO));
        assert!(!signals.wait_new_frame(Duration::ZERO));
    }

    #[test]
    fn wait_new_frame_times_out() {
        let signals = PipelineSignals::new();
        let start = Instant::now();
        assert!(!signals.wait_new_frame(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
