//! Dynamically resizable counting semaphore
//!
//! Both the mover scheduler's concurrency limit and the bundled space
//! allocator are built on the same primitive: a weighted semaphore whose
//! maximum may be changed at runtime. Lowering the maximum never revokes
//! permits already held; it only throttles future acquisition until enough
//! permits have been returned.

use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Debug)]
struct State {
    max: u64,
    used: u64,
}

/// A weighted counting semaphore with a runtime-adjustable maximum.
///
/// `acquire` suspends the calling task until the requested weight fits under
/// the current maximum. Resizing is race-free with concurrent acquire and
/// release: waiters re-check the limit on every wakeup.
#[derive(Debug)]
pub struct AdjustableSemaphore {
    state: Mutex<State>,
    notify: Notify,
}

impl AdjustableSemaphore {
    /// Create a semaphore with the given initial maximum.
    pub fn new(max_permits: u64) -> Self {
        Self {
            state: Mutex::new(State {
                max: max_permits,
                used: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Acquire `permits` units, waiting until they fit under the maximum.
    pub async fn acquire(&self, permits: u64) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // register before the check so a concurrent release cannot be lost
            notified.as_mut().enable();

            if self.try_acquire(permits) {
                return;
            }
            notified.await;
        }
    }

    /// Acquire `permits` units without waiting. Returns false if they do not
    /// currently fit under the maximum.
    pub fn try_acquire(&self, permits: u64) -> bool {
        let mut state = self.state.lock();
        if state.used.saturating_add(permits) <= state.max {
            state.used += permits;
            true
        } else {
            false
        }
    }

    /// Return `permits` units to the pool.
    pub fn release(&self, permits: u64) {
        let mut state = self.state.lock();
        state.used = state.used.saturating_sub(permits);
        drop(state);
        self.notify.notify_waiters();
    }

    /// Change the maximum number of permits.
    ///
    /// Holders are never preempted: if the new maximum is below the number of
    /// permits currently out, acquisition stalls until enough are released.
    pub fn set_max_permits(&self, max: u64) {
        self.state.lock().max = max;
        self.notify.notify_waiters();
    }

    /// Current maximum.
    pub fn max_permits(&self) -> u64 {
        self.state.lock().max
    }

    /// Permits currently held.
    pub fn used_permits(&self) -> u64 {
        self.state.lock().used
    }

    /// Permits currently available for acquisition.
    pub fn available_permits(&self) -> u64 {
        let state = self.state.lock();
        state.max.saturating_sub(state.used)
    }
}
