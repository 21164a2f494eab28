//! Per-thread interruption tokens.
//!
//! Every thread owns an [`Interrupter`]. An interruptible wait parks the
//! monitor it sleeps on with the calling thread's interrupter, so that
//! [`Interrupter::interrupt`] from any other thread can wake it. A wait that
//! observes the flag clears it and reports the interruption to its caller.

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Something an interrupter can wake while a thread is parked on it.
pub(crate) trait Wake: Send + Sync {
    /// Wake every thread sleeping on this target.
    fn wake(&self);
}

thread_local! {
    static CURRENT: RefCell<Arc<Interrupter>> = RefCell::new(Arc::new(Interrupter::new()));
}

/// Interruption flag for one thread, plus the monitor it is parked on.
pub struct Interrupter {
    flag: AtomicBool,
    parked: Mutex<Option<Arc<dyn Wake>>>,
}

impl Interrupter {
    /// Create a fresh, uninterrupted token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
            parked: Mutex::new(None),
        }
    }

    /// Set the flag and wake the owning thread if it is inside an
    /// interruptible wait.
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::SeqCst);
        // Clone out of the slot so the waker runs without holding `parked`.
        let target = self.parked.lock().clone();
        if let Some(target) = target {
            target.wake();
        }
    }

    /// Whether an interrupt is pending. Does not clear it.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clear the flag, returning whether it was set.
    pub fn take(&self) -> bool {
        self.flag.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn park(&self, target: Arc<dyn Wake>) -> Parked<'_> {
        *self.parked.lock() = Some(target);
        Parked { owner: self }
    }
}

impl Default for Interrupter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Interrupter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interrupter")
            .field("interrupted", &self.is_interrupted())
            .finish_non_exhaustive()
    }
}

/// Registration of a parked wait; unregisters on drop.
pub(crate) struct Parked<'a> {
    owner: &'a Interrupter,
}

impl Drop for Parked<'_> {
    fn drop(&mut self) {
        self.owner.parked.lock().take();
    }
}

/// The calling thread's interrupter.
///
/// Hand the returned token to another thread to cancel an interruptible
/// wait (`wait_for(true)`) issued by this one.
#[must_use]
pub fn current() -> Arc<Interrupter> {
    CURRENT.with(|slot| Arc::clone(&slot.borrow()))
}

/// Replace the calling thread's interrupter. Worker threads install the one
/// the scheduler keeps for them, so shutdown can reach their waits.
pub(crate) fn install(interrupter: Arc<Interrupter>) {
    CURRENT.with(|slot| *slot.borrow_mut() = interrupter);
}
