//! Idle Tracking
//!
//! [`IdleTracker`] counts work in flight on an object and lets another
//! thread wait until all of it has completed. Stopping a converter, for
//! instance, waits for the buffers it has queued to its worker to be
//! processed before tearing the worker down.
//!
//! ```rust
//! use messaging_objects::IdleTracker;
//!
//! let tracker = IdleTracker::new();
//! let guard = tracker.begin();
//! assert!(!tracker.is_idle());
//! drop(guard);
//! tracker.wait_for_idle();
//! ```

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Default)]
struct IdleState {
    busy: Mutex<usize>,
    idle: Condvar,
}

/// Count of outstanding work items with a wait-for-zero operation
#[derive(Clone, Default)]
pub struct IdleTracker {
    state: Arc<IdleState>,
}

impl IdleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark one work item in flight until the guard is dropped
    pub fn begin(&self) -> BusyGuard {
        *self.state.busy.lock() += 1;
        BusyGuard {
            state: Arc::clone(&self.state),
        }
    }

    pub fn busy(&self) -> usize {
        *self.state.busy.lock()
    }

    pub fn is_idle(&self) -> bool {
        self.busy() == 0
    }

    /// Block until no work item is in flight
    pub fn wait_for_idle(&self) {
        let mut busy = self.state.busy.lock();
        while *busy > 0 {
            self.state.idle.wait(&mut busy);
        }
    }

    /// Block until no work item is in flight or `timeout` elapsed
    ///
    /// Returns true if the tracker became idle.
    pub fn wait_for_idle_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut busy = self.state.busy.lock();
        while *busy > 0 {
            if self.state.idle.wait_until(&mut busy, deadline).timed_out() {
                return *busy == 0;
            }
        }
        true
    }
}

impl fmt::Debug for IdleTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdleTracker")
            .field("busy", &self.busy())
            .finish()
    }
}

/// Outstanding work item of an [`IdleTracker`]
///
/// The guard is `Send`, so it can travel with the work it tracks, for
/// example captured by a queued call.
#[must_use = "work is only tracked while the guard is alive"]
pub struct BusyGuard {
    state: Arc<IdleState>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        let mut busy = self.state.busy.lock();
        *busy = busy.saturating_sub(1);
        if *busy == 0 {
            self.state.idle.notify_all();
        }
    }
}

impl fmt::Debug for BusyGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BusyGuard")
    }
}
