//! Mutex + condition variable pairs with interruptible predicate waits.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::util::interrupt::{Interrupter, Wake};

/// How a monitor wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    /// The wait condition no longer holds.
    Satisfied,
    /// The waiting thread was interrupted first.
    Interrupted,
    /// The deadline passed first.
    TimedOut,
}

impl WaitOutcome {
    pub(crate) const fn is_satisfied(self) -> bool {
        matches!(self, Self::Satisfied)
    }
}

struct Inner<T> {
    state: Mutex<T>,
    cond: Condvar,
}

impl<T: Send> Wake for Inner<T> {
    fn wake(&self) {
        let _guard = self.state.lock();
        self.cond.notify_all();
    }
}

/// State guarded by a `parking_lot::Mutex`, with a `Condvar` for waiters.
///
/// Held behind an `Arc` so a parked wait can hand itself to an
/// [`Interrupter`].
pub(crate) struct Monitor<T> {
    inner: Arc<Inner<T>>,
}

impl<T: Send + 'static> Monitor<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(value),
                cond: Condvar::new(),
            }),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.state.lock()
    }

    /// Notify waiters. Callers must have changed the guarded state under the
    /// lock before calling this.
    pub(crate) fn notify_all(&self) {
        self.inner.cond.notify_all();
    }

    /// Lock, then notify. Used when waiters' conditions depend on state
    /// outside this monitor.
    pub(crate) fn wake(&self) {
        self.inner.wake();
    }

    /// Block while `condition` holds.
    ///
    /// With an interrupter, a pending interrupt ends the wait (and is
    /// consumed) once the condition has been re-checked. With a deadline,
    /// the wait ends when it passes.
    pub(crate) fn wait_while<F>(
        &self,
        guard: &mut MutexGuard<'_, T>,
        interrupter: Option<&Interrupter>,
        deadline: Option<Instant>,
        mut condition: F,
    ) -> WaitOutcome
    where
        F: FnMut(&mut T) -> bool,
    {
        let _parked = interrupter.map(|token| {
            let target: Arc<dyn Wake> = self.inner.clone();
            token.park(target)
        });
        loop {
            if !condition(guard) {
                return WaitOutcome::Satisfied;
            }
            if interrupter.is_some_and(Interrupter::take) {
                return WaitOutcome::Interrupted;
            }
            match deadline {
                Some(deadline) => {
                    if self.inner.cond.wait_until(guard, deadline).timed_out() {
                        return if condition(guard) {
                            WaitOutcome::TimedOut
                        } else {
                            WaitOutcome::Satisfied
                        };
                    }
                }
                None => self.inner.cond.wait(guard),
            }
        }
    }
}
