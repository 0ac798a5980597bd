//! Pool-wide wait primitive
//!
//! Every blocking operation waits on a single condition variable paired with
//! the pool mutex. Waits are bounded by the pool's wake interval so that the
//! throughput monitor gets polled even when nothing moves, and each wake
//! re-evaluates the flags and the configuration generation.

use super::pool::PoolState;
use parking_lot::{Condvar, MutexGuard};
use tracing::warn;

#[derive(Debug, Default)]
pub(crate) struct WaitPrimitive {
    cond: Condvar,
}

impl WaitPrimitive {
    pub(crate) fn new() -> Self {
        Self {
            cond: Condvar::new(),
        }
    }

    /// Wake every waiter so they re-check their predicates
    pub(crate) fn notify(&self) {
        self.cond.notify_all();
    }

    /// Wait for any change of pool state.
    ///
    /// Returns `true` when the caller should re-check its predicate, `false`
    /// when waiting is pointless: an error flag is set or the pool was
    /// reconfigured since the wait began.
    pub(crate) fn await_change(&self, state: &mut MutexGuard<'_, PoolState>) -> bool {
        let generation = state.generation;
        let eof_read = state.flags.eof_read;
        let eof_write = state.flags.eof_write;
        let mut signalled = false;

        loop {
            if !state.monitor.check() && state.reject_transfer() {
                warn!(
                    generation = state.generation,
                    "Throughput monitor rejected transfer while waiting"
                );
            }
            // configure() resets the flags, so this must come before the EOF check
            if state.generation != generation {
                return false;
            }
            if state.flags.eof_read != eof_read || state.flags.eof_write != eof_write {
                return true;
            }
            if state.flags.any_error() {
                return false;
            }
            if signalled {
                return true;
            }
            let interval = state.wake_interval;
            signalled = !self.cond.wait_for(state, interval).timed_out();
        }
    }

    /// Block until `done` holds, waking at least once per interval
    pub(crate) fn wait_until<F>(&self, state: &mut MutexGuard<'_, PoolState>, mut done: F)
    where
        F: FnMut(&PoolState) -> bool,
    {
        while !done(&**state) {
            let interval = state.wake_interval;
            self.cond.wait_for(state, interval);
        }
    }
}
