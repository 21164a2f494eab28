//! Worker threads: affinity, dispatch and round-robin job discovery.

use std::cell::RefCell;
use std::fmt;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::core::activity::{Activity, ActivityState};
use crate::core::error::SchedulerError;
use crate::core::job::Job;
use crate::core::unit::WorkUnit;
use crate::util::interrupt::{self, Interrupter};

use super::Shared;

thread_local! {
    static CURRENT_WORKER: RefCell<Option<Arc<Worker>>> = const { RefCell::new(None) };
}

/// What a worker is attached to right now.
#[derive(Default)]
struct WorkerContext {
    /// Job the worker is charged against.
    affinity: Option<Arc<Job>>,
    /// Unit whose body is executing on this worker.
    current_unit: Option<Arc<WorkUnit>>,
}

/// One scheduler-owned OS thread.
pub(crate) struct Worker {
    index: usize,
    name: String,
    scheduler_id: Uuid,
    scheduler: Weak<Shared>,
    activity: Activity,
    interrupter: Arc<Interrupter>,
    context: Mutex<WorkerContext>,
    rng: Mutex<StdRng>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    pub(crate) fn new(index: usize, prefix: &str, scheduler_id: Uuid, scheduler: Weak<Shared>) -> Self {
        let name = format!("{prefix}-{index}");
        Self {
            index,
            activity: Activity::new(name.clone()),
            name,
            scheduler_id,
            scheduler,
            interrupter: Arc::new(Interrupter::new()),
            context: Mutex::new(WorkerContext::default()),
            rng: Mutex::new(StdRng::from_os_rng()),
            handle: Mutex::new(None),
        }
    }

    /// The worker running on the calling thread, if any.
    pub(crate) fn current() -> Option<Arc<Self>> {
        CURRENT_WORKER.with(|slot| slot.borrow().clone())
    }

    pub(crate) const fn index(&self) -> usize {
        self.index
    }

    pub(crate) const fn scheduler_id(&self) -> Uuid {
        self.scheduler_id
    }

    pub(crate) fn interrupter(&self) -> &Interrupter {
        &self.interrupter
    }

    pub(crate) fn interrupt(&self) {
        self.interrupter.interrupt();
    }

    pub(crate) fn shared(&self) -> Result<Arc<Shared>, SchedulerError> {
        self.scheduler
            .upgrade()
            .ok_or(SchedulerError::NotAccepting(ActivityState::Terminated))
    }

    pub(crate) fn with_random<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        f(&mut self.rng.lock())
    }

    pub(crate) fn affinity(&self) -> Option<Arc<Job>> {
        self.context.lock().affinity.clone()
    }

    pub(crate) fn is_affiliated_with(&self, job: &Arc<Job>) -> bool {
        self.context
            .lock()
            .affinity
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, job))
    }

    /// Replace the affinity without touching any quota.
    pub(crate) fn set_affinity(&self, job: Option<Arc<Job>>) -> Option<Arc<Job>> {
        std::mem::replace(&mut self.context.lock().affinity, job)
    }

    pub(crate) fn current_unit(&self) -> Option<Arc<WorkUnit>> {
        self.context.lock().current_unit.clone()
    }

    pub(crate) fn replace_current_unit(&self, unit: Option<Arc<WorkUnit>>) -> Option<Arc<WorkUnit>> {
        std::mem::replace(&mut self.context.lock().current_unit, unit)
    }

    /// Drop the affinity and give its quota slot back.
    fn release_affinity(&self) {
        if let Some(job) = self.set_affinity(None) {
            trace!(worker = self.index, job_id = %job.id(), "worker left job");
            job.release_worker();
        }
    }

    /// Spawn the worker's thread unless it was already started.
    pub(crate) fn start(self: &Arc<Self>, config: &SchedulerConfig) -> Result<(), SchedulerError> {
        if self.activity.state() != ActivityState::Initialized {
            return Ok(());
        }
        self.activity.start(|| {
            let worker = Arc::clone(self);
            let handle = thread::Builder::new()
                .name(self.name.clone())
                .stack_size(config.thread_stack_size)
                .spawn(move || worker.run())?;
            *self.handle.lock() = Some(handle);
            Ok(())
        })
    }

    fn run(self: Arc<Self>) {
        interrupt::install(Arc::clone(&self.interrupter));
        CURRENT_WORKER.with(|slot| *slot.borrow_mut() = Some(Arc::clone(&self)));
        debug!(worker = self.index, "worker thread started");

        loop {
            let Some(shared) = self.scheduler.upgrade() else {
                break;
            };
            if !shared.activity().is_running() {
                break;
            }
            self.dispatch(&shared);
        }

        self.release_affinity();
        CURRENT_WORKER.with(|slot| slot.borrow_mut().take());
        self.activity.begin_abort();
        self.activity.finished();
        debug!(worker = self.index, "worker thread exiting");
    }

    /// One scheduling step: stay with the affiliated job if it has work,
    /// otherwise look for any job that does.
    fn dispatch(self: &Arc<Self>, shared: &Shared) {
        if let Some(job) = self.affinity() {
            if job.run_one(self) {
                return;
            }
            self.release_affinity();
        }
        self.find_job(shared);
    }

    /// One round-robin pass over the registry from the shared cursor. If no
    /// job gave this worker anything, sleep until the registry epoch moves.
    fn find_job(self: &Arc<Self>, shared: &Shared) -> bool {
        let Some((jobs, cursor, epoch)) = shared.snapshot() else {
            return false;
        };

        let count = jobs.len();
        for offset in 0..count {
            let position = (cursor + offset) % count;
            if jobs[position].run_one(self) {
                shared.advance_cursor(position);
                return true;
            }
        }
        // Drop our job references before sleeping.
        drop(jobs);

        shared.wait_for_work(epoch, &self.interrupter);
        false
    }

    /// Wait up to `grace` for the thread to leave its loop, then join it.
    /// A thread still inside a body after the grace period is detached.
    pub(crate) fn join(&self, grace: Duration) {
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        if !self.activity.wait_timeout(grace) {
            warn!(
                worker = self.index,
                grace_ms = grace.as_millis(),
                "worker did not exit within grace period, detaching"
            );
            return;
        }
        if handle.join().is_err() {
            warn!(worker = self.index, "worker thread panicked");
        } else {
            debug!(worker = self.index, "worker joined");
        }
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("state", &self.activity.state())
            .finish_non_exhaustive()
    }
}
