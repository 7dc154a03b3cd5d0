//! The shared capture surface's cross-context lock.

use core::time::Duration;

use crate::status::Status;

/// A key of the shared surface's keyed mutex.
///
/// A keyed mutex hands the resource between two fixed roles instead of acting
/// as a generic lock: each key names the token one side waits on. A worker
/// acquires [`MutexKey::Capture`] and releases [`MutexKey::Publish`], handing
/// its committed frame to the arbitration routine; the arbitration routine
/// acquires [`MutexKey::Publish`] and releases [`MutexKey::Capture`], handing
/// the surface back. After a skipped tick with no genuinely new frame the
/// arbitration routine re-acquires its own prior release through
/// [`MutexKey::Capture`], competing with the workers on equal terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexKey {
    /// Key 0: the token the capture workers wait on.
    Capture,
    /// Key 1: the token the arbitration routine waits on.
    Publish,
}

impl MutexKey {
    /// The raw key value.
    pub const fn value(self) -> u64 {
        match self {
            Self::Capture => 0,
            Self::Publish => 1,
        }
    }
}

/// Bounded-wait keyed lock over the shared capture surface.
///
/// Implemented by the GPU keyed mutex on Windows and by mocks in tests.
pub trait SurfaceMutex {
    /// Try to acquire with `key`, waiting at most `timeout`.
    ///
    /// `Ok(true)` on acquisition, `Ok(false)` when the wait timed out because
    /// another actor holds the surface, `Err` for real failures.
    fn acquire(&self, key: MutexKey, timeout: Duration) -> Result<bool, Status>;

    /// Release the surface, waking whoever waits on `key`.
    fn release(&self, key: MutexKey) -> Result<(), Status>;
}

/// Run `body` while holding the surface lock, releasing on every exit path.
///
/// Returns `Ok(None)` when the acquire timed out; the caller keeps whatever
/// pending state it has and retries later. A failure inside `body` still
/// releases exactly once before propagating, so an error can never poison
/// the surface for the other side.
pub fn with_surface_lock<S, T, F>(
    surface: &S,
    acquire: MutexKey,
    release: MutexKey,
    timeout: Duration,
    body: F,
) -> Result<Option<T>, Status>
where
    S: SurfaceMutex + ?Sized,
    F: FnOnce() -> Result<T, Status>,
{
    if !surface.acquire(acquire, timeout)? {
        return Ok(None);
    }

    let result = body();
    let released = surface.release(release);

    match result {
        Ok(value) => {
            released?;
            Ok(Some(value))
        }
        // The body's failure is the interesting one; a release failure after
        // it would be a symptom of the same device loss.
        Err(error) => Err(error),
    }
}

#[cfg(test)]
mod tests {
    use core::cell::RefCell;

    use super::*;

    #[derive(Default)]
    struct CountingMutex {
        acquires: RefCell<Vec<MutexKey>>,
        releases: RefCell<Vec<MutexKey>>,
        timeout: bool,
    }

    impl SurfaceMutex for CountingMutex {
        fn acquire(&self, key: MutexKey, _timeout: Duration) -> Result<bool, Status> {
            if self.timeout {
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
    fn success_releases_once_with_the_opposite_key() {
        let mutex = CountingMutex::default();
        let result = with_surface_lock(
            &mutex,
            MutexKey::Capture,
            MutexKey::Publish,
            Duration::from_secs(1),
            || Ok(42),
        );

        assert_eq!(result, Ok(Some(42)));
        assert_eq!(*mutex.acquires.borrow(), vec![MutexKey::Capture]);
        assert_eq!(*mutex.releases.borrow(), vec![MutexKey::Publish]);
    }

    #[test]
    fn body_failure_still_releases_once() {
        let mutex = CountingMutex::default();
        let result: Result<Option<()>, _> = with_surface_lock(
            &mutex,
            MutexKey::Publish,
            MutexKey::Capture,
            Duration::from_secs(1),
            || Err(Status::ACCESS_LOST),
        );

        assert_eq!(result, Err(Status::ACCESS_LOST));
        assert_eq!(*mutex.releases.borrow(), vec![MutexKey::Capture]);
    }

    #[test]
    fn timeout_never_releases() {
        let mutex = CountingMutex {
            timeout: true,
            ..Default::default()
        };
        let result = with_surface_lock(
            &mutex,
            MutexKey::Publish,
            MutexKey::Capture,
            Duration::from_secs(1),
            || Ok(()),
        );

        assert_eq!(result, Ok(None));
        assert!(mutex.acquires.borrow().is_empty());
        assert!(mutex.releases.borrow().is_empty());
    }
}
