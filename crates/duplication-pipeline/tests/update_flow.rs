//! End-to-end tests for the host-independent update flow: rate limiter,
//! arbitration planning and the surface lock protocol working together.
//!

use core::{cell::RefCell, time::Duration};
use std::time::Instant;

use duplication_pipeline::{
    with_surface_lock, Arbitrator, ConsumerRegion, DirtyRegion, MutexKey, PipelineSignals,
    PlanInputs, Rect, Status, SurfaceMutex, UpdateLimitMode, UpdateLimiter, UpdatePlan,
};

const SURFACE: Rect = Rect::new(0, 0, 1920, 1080);

fn consumer(crop: Rect) -> ConsumerRegion {
    ConsumerRegion {
        crop,
        sources_pipeline: true,
        limit_override: None,
    }
}

fn inputs<'a>(consumers: &'a [ConsumerRegion], dirty: DirtyRegion, skip: bool) -> PlanInputs<'a> {
    PlanInputs {
        new_frame: true,
        skip,
        dirty,
        pointer_changed: false,
        old_pointer_bounds: None,
        new_pointer_bounds: None,
        full_refresh: false,
        surface_rect: SURFACE,
        consumers,
    }
}

fn dirty(rect: Rect) -> DirtyRegion {
    let mut region = DirtyRegion::new();
    region.add(rect);
    region
}

/// A surface lock that records every key transition.
#[derive(Default)]
struct RecordingMutex {
    acquires: RefCell<Vec<MutexKey>>,
    releases: RefCell<Vec<MutexKey>>,
    busy: bool,
}

impl SurfaceMutex for RecordingMutex {
    fn acquire(&self, key: MutexKey, _timeout: Duration) -> Result<bool, Status> {
        if self.busy {
            return Ok(false);
        }
        self.acquires.borrow_mut().push(key);
        Ok(true)
    }

    fn release(&self, key: MutexKey) -> Result<(), Status> {
        self.releases.borrow_mut().push(key);
        Ok(())
    }
}

#[test]
fn rate_limited_frames_defer_and_drain_as_one_union() {
    let consumers = [consumer(SURFACE)];
    let mut arbitrator = Arbitrator::new();
    let mut limiter = UpdateLimiter::new();
    limiter.recompute(UpdateLimitMode::Milliseconds(100), core::iter::empty());

    let last_publish = Instant::now();

    // Two frames arrive inside the limit window; both defer.
    for rect in [Rect::new(0, 0, 100, 100), Rect::new(200, 200, 300, 300)] {
        let now = last_publish + Duration::from_millis(10);
        assert!(limiter.should_skip(last_publish, now));

        let plan = arbitrator.plan(&inputs(&consumers, dirty(rect), true));
        assert_eq!(plan, UpdatePlan::Deferred);
    }

    // The limit elapses; the next frame publishes the union of everything.
    let now = last_publish + Duration::from_millis(150);
    assert!(!limiter.should_skip(last_publish, now));

    let plan = arbitrator.plan(&inputs(&consumers, dirty(Rect::new(50, 50, 60, 60)), false));
    let UpdatePlan::Publish(publish) = plan else {
        panic!("accepted frame must publish");
    };
    assert_eq!(publish.dirty, Rect::new(0, 0, 300, 300));
}

#[test]
fn parked_state_is_retaken_with_the_capture_key() {
    let consumers = [consumer(SURFACE)];
    let mut arbitrator = Arbitrator::new();

    // A rate-limited tick with no new frame defers without the surface.
    assert!(!arbitrator.needs_surface(false, true));
    arbitrator.defer(&dirty(Rect::new(10, 10, 20, 20)));

    // Once eligible, the drain re-takes the arbitration side's own release.
    assert!(arbitrator.needs_surface(false, false));
    let key = arbitrator.mutex_key(false);
    assert_eq!(key, MutexKey::Capture);

    let mutex = RecordingMutex::default();
    let outcome = with_surface_lock(&mutex, key, MutexKey::Capture, Duration::ZERO, || {
        Ok(arbitrator.plan(&inputs(&consumers, DirtyRegion::new(), false)))
    })
    .unwrap();

    let UpdatePlan::Publish(publish) = outcome.unwrap() else {
        panic!("parked dirty state must drain");
    };
    assert_eq!(publish.dirty, Rect::new(10, 10, 20, 20));
    assert_eq!(*mutex.acquires.borrow(), vec![MutexKey::Capture]);
    assert_eq!(*mutex.releases.borrow(), vec![MutexKey::Capture]);
}

#[test]
fn worker_handoff_releases_with_the_opposite_key() {
    let mutex = RecordingMutex::default();

    // The worker side takes the capture key and hands off to arbitration.
    let written = with_surface_lock(
        &mutex,
        MutexKey::Capture,
        MutexKey::Publish,
        Duration::from_secs(1),
        || Ok(()),
    )
    .unwrap();
    assert!(written.is_some());

    // The arbitration side takes the publish key and hands back.
    let drained = with_surface_lock(
        &mutex,
        MutexKey::Publish,
        MutexKey::Capture,
        Duration::from_secs(1),
        || Ok(()),
    )
    .unwrap();
    assert!(drained.is_some());

    assert_eq!(
        *mutex.acquires.borrow(),
        vec![MutexKey::Capture, MutexKey::Publish]
    );
    assert_eq!(
        *mutex.releases.borrow(),
        vec![MutexKey::Publish, MutexKey::Capture]
    );
}

#[test]
fn busy_surface_leaves_pending_state_intact() {
    let mutex = RecordingMutex {
        busy: true,
        ..RecordingMutex::default()
    };

    let mut touched = false;
    let outcome = with_surface_lock(
        &mutex,
        MutexKey::Publish,
        MutexKey::Capture,
        Duration::from_millis(1),
        || {
            touched = true;
            Ok(())
        },
    )
    .unwrap();

    assert!(outcome.is_none());
    assert!(!touched, "the body must not run without the lock");
    assert!(mutex.releases.borrow().is_empty());
}

#[test]
fn failure_inside_the_lock_still_releases() {
    let mutex = RecordingMutex::default();

    let result: Result<Option<()>, Status> = with_surface_lock(
        &mutex,
        MutexKey::Capture,
        MutexKey::Publish,
        Duration::from_secs(1),
        || Err(Status::ACCESS_LOST),
    );

    assert_eq!(result.unwrap_err(), Status::ACCESS_LOST);
    assert_eq!(*mutex.releases.borrow(), vec![MutexKey::Publish]);
}

#[test]
fn error_latch_interrupts_a_new_frame_wait() {
    let signals = std::sync::Arc::new(PipelineSignals::new());

    let waiter = {
        let signals = std::sync::Arc::clone(&signals);
        std::thread::spawn(move || signals.wait_failure())
    };

    std::thread::sleep(Duration::from_millis(20));
    signals.signal_error(duplication_pipeline::ErrorSignal::Expected);

    let wake = waiter.join().unwrap();
    assert_eq!(
        wake,
        duplication_pipeline::signals::SupervisorWake::Error(
            duplication_pipeline::ErrorSignal::Expected
        )
    );
}
