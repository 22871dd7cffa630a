//! Disposal of container-owned instances.
//!
//! Instances that implement [`Dispose`] are recorded by whichever owner
//! controls their lifetime (a scope or the container) and released in
//! reverse order of creation when that owner is disposed.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::BoxError;
use crate::key::ServiceKey;

/// Release hook for instances owned by the container.
///
/// Errors are logged and never stop the release of other instances.
///
/// ```
/// use rabt_container::lifecycle::Dispose;
/// use rabt_container::error::BoxError;
///
/// struct Pool;
///
/// impl Dispose for Pool {
///     fn dispose(&self) -> Result<(), BoxError> {
///         // close connections
///         Ok(())
///     }
/// }
/// ```
pub trait Dispose: Send + Sync {
    fn dispose(&self) -> Result<(), BoxError>;
}

impl<T: ?Sized + Dispose> Dispose for Arc<T> {
    fn dispose(&self) -> Result<(), BoxError> {
        (**self).dispose()
    }
}

#[derive(Default)]
struct Tracked {
    entries: Vec<(ServiceKey, Arc<dyn Dispose>)>,
    closed: bool,
}

/// Disposables owned by one scope or container, in creation order.
///
/// Once drained the bag is closed: anything pushed afterwards is released
/// on the spot instead of being kept.
#[derive(Default)]
pub(crate) struct DisposeBag {
    tracked: Mutex<Tracked>,
}

impl DisposeBag {
    /// Tracks `disposable`, or releases it at once when the bag is closed.
    ///
    /// Returns `false` in the latter case.
    pub(crate) fn push(&self, service: ServiceKey, disposable: Arc<dyn Dispose>) -> bool {
        let mut tracked = self.tracked.lock();
        if tracked.closed {
            drop(tracked);
            debug!(service = %service, "Owner already disposed, releasing immediately");
            release(service, &*disposable);
            return false;
        }

        trace!(service = %service, "Tracking disposable");
        tracked.entries.push((service, disposable));
        true
    }

    pub(crate) fn len(&self) -> usize {
        self.tracked.lock().entries.len()
    }

    /// Closes the bag and disposes everything tracked so far, newest first.
    ///
    /// Returns how many instances were released.
    pub(crate) fn dispose_all(&self) -> usize {
        let entries = {
            let mut tracked = self.tracked.lock();
            tracked.closed = true;
            std::mem::take(&mut tracked.entries)
        };
        let count = entries.len();

        for (service, disposable) in entries.into_iter().rev() {
            release(service, &*disposable);
        }

        count
    }
}

fn release(service: ServiceKey, disposable: &dyn Dispose) {
    match panic::catch_unwind(AssertUnwindSafe(|| disposable.dispose())) {
        Ok(Ok(())) => trace!(service = %service, "Disposed"),
        Ok(Err(error)) => {
            warn!(service = %service, error = %error, "Dispose failed, continuing")
        }
        Err(_) => warn!(service = %service, "Dispose panicked, continuing"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        id: u32,
        log: Arc<Mutex<Vec<u32>>>,
        fail: bool,
    }

    impl Dispose for Recorder {
        fn dispose(&self) -> Result<(), BoxError> {
            self.log.lock().push(self.id);
            if self.fail {
                return Err("flush failed".into());
            }
            Ok(())
        }
    }

    struct Exploding;

    impl Dispose for Exploding {
        fn dispose(&self) -> Result<(), BoxError> {
            panic!("boom");
        }
    }

    fn recorder(id: u32, log: &Arc<Mutex<Vec<u32>>>, fail: bool) -> Arc<dyn Dispose> {
        Arc::new(Recorder {
            id,
            log: log.clone(),
            fail,
        })
    }

    #[test]
    fn disposes_in_reverse_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let bag = DisposeBag::default();
        for id in 1..=3 {
            bag.push(ServiceKey::of::<Recorder>(), recorder(id, &log, false));
        }

        assert_eq!(bag.dispose_all(), 3);
        assert_eq!(*log.lock(), vec![3, 2, 1]);
        assert_eq!(bag.len(), 0);
    }

    #[test]
    fn failures_do_not_stop_the_rest() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let bag = DisposeBag::default();
        bag.push(ServiceKey::of::<Recorder>(), recorder(1, &log, false));
        bag.push(ServiceKey::of::<Exploding>(), Arc::new(Exploding));
        bag.push(ServiceKey::of::<Recorder>(), recorder(2, &log, true));

        assert_eq!(bag.dispose_all(), 3);
        assert_eq!(*log.lock(), vec![2, 1]);
    }

    #[test]
    fn second_drain_is_empty() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let bag = DisposeBag::default();
        bag.push(ServiceKey::of::<Recorder>(), recorder(1, &log, false));

        bag.dispose_all();
        assert_eq!(bag.dispose_all(), 0);
        assert_eq!(*log.lock(), vec![1]);
    }

    #[test]
    fn push_after_drain_releases_immediately() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let bag = DisposeBag::default();
        assert!(bag.push(ServiceKey::of::<Recorder>(), recorder(1, &log, false)));
        bag.dispose_all();

        assert!(!bag.push(ServiceKey::of::<Recorder>(), recorder(2, &log, false)));
        assert_eq!(*log.lock(), vec![1, 2]);
        assert_eq!(bag.len(), 0);
        assert_eq!(bag.dispose_all(), 0);
    }
}
