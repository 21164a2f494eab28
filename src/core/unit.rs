//! Work units: the pending-count tree shared by jobs and sub-jobs.
//!
//! Every unit starts with a pending count of one (its own body). Spawning a
//! child adds one to the parent; each finished or aborted child takes one
//! away. When a count reaches zero the unit is done and the completion moves
//! up to its owner, or, for a job's root unit, the job leaves the registry.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::core::error::SchedulerError;
use crate::core::ids::{JobId, UnitId};
use crate::core::job::Job;
use crate::core::monitor::{Monitor, WaitOutcome};
use crate::core::runnable::Body;
use crate::core::worker_pool::worker::Worker;
use crate::util::interrupt;

/// One schedulable piece of work.
pub(crate) struct WorkUnit {
    id: UnitId,
    job: Arc<Job>,
    owner: Option<Arc<WorkUnit>>,
    body: Mutex<Option<Body>>,
    pending: Monitor<usize>,
}

impl WorkUnit {
    /// Root unit of `job`; not yet queued.
    pub(crate) fn root(job: Arc<Job>, body: Body) -> Arc<Self> {
        Arc::new(Self {
            id: UnitId::next(),
            job,
            owner: None,
            body: Mutex::new(Some(body)),
            pending: Monitor::new(1),
        })
    }

    pub(crate) const fn id(&self) -> UnitId {
        self.id
    }

    pub(crate) fn job(&self) -> &Arc<Job> {
        &self.job
    }

    pub(crate) fn job_id(&self) -> JobId {
        self.job.id()
    }

    pub(crate) const fn is_root(&self) -> bool {
        self.owner.is_none()
    }

    pub(crate) fn owner_id(&self) -> Option<UnitId> {
        self.owner.as_ref().map(|owner| owner.id)
    }

    pub(crate) fn pending(&self) -> usize {
        *self.pending.lock()
    }

    /// Body and all children finished (or the unit was aborted).
    pub(crate) fn is_done(&self) -> bool {
        self.pending() == 0
    }

    /// No unfinished children; the body itself may still be running.
    pub(crate) fn is_flushed(&self) -> bool {
        self.pending() <= 1
    }

    pub(crate) fn take_body(&self) -> Option<Body> {
        self.body.lock().take()
    }

    /// Create a child owned by this unit and queue it on the job.
    pub(crate) fn spawn_child(self: &Arc<Self>, body: Body) -> Result<Arc<Self>, SchedulerError> {
        if self.job.is_aborted() {
            return Err(SchedulerError::JobAborted(self.job.id()));
        }
        {
            let mut pending = self.pending.lock();
            if *pending == 0 {
                return Err(SchedulerError::UnitFinished(self.id));
            }
            *pending += 1;
        }

        let child = Arc::new(Self {
            id: UnitId::next(),
            job: Arc::clone(&self.job),
            owner: Some(Arc::clone(self)),
            body: Mutex::new(Some(body)),
            pending: Monitor::new(1),
        });
        trace!(job_id = %self.job.id(), unit_id = %child.id, owner = %self.id, "spawned sub-job");

        if !self.job.enqueue(Arc::clone(&child)) {
            // The job was aborted between the check above and the enqueue.
            child.abort();
            return Err(SchedulerError::JobAborted(self.job.id()));
        }
        Ok(child)
    }

    /// Count one finished body or child, cascading to the owner at zero.
    pub(crate) fn one_finished(&self) {
        let mut unit = self;
        loop {
            let remaining = {
                let mut pending = unit.pending.lock();
                if *pending == 0 {
                    trace!(unit_id = %unit.id, "completion after unit already finished");
                    return;
                }
                *pending -= 1;
                if *pending == 0 {
                    if unit.is_root() {
                        // Leave the registry before any waiter can observe zero.
                        unit.job.finished();
                    }
                    unit.pending.notify_all();
                }
                *pending
            };

            if remaining <= 1 {
                unit.job.notify_progress();
            }
            if remaining > 0 {
                return;
            }
            match &unit.owner {
                Some(owner) => unit = owner.as_ref(),
                None => {
                    unit.job.release_queue();
                    return;
                }
            }
        }
    }

    /// Force the unit done without running the normal accounting.
    ///
    /// A root unit first aborts every queued unit of its job.
    pub(crate) fn abort(&self) {
        if self.is_root() {
            self.job.abort_queued();
        }

        let forced = {
            let mut pending = self.pending.lock();
            if *pending == 0 {
                false
            } else {
                *pending = 0;
                if self.is_root() {
                    self.job.finished();
                }
                self.pending.notify_all();
                true
            }
        };
        if !forced {
            return;
        }
        debug!(job_id = %self.job.id(), unit_id = %self.id, "unit aborted");

        self.job.notify_progress();
        match &self.owner {
            Some(owner) => owner.one_finished(),
            None => self.job.release_queue(),
        }
    }

    /// Wait until done. On a worker of the same scheduler this helps run the
    /// job's queued work instead of blocking.
    pub(crate) fn wait_for(&self, interruptible: bool, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        if let Some(worker) = Worker::current() {
            if worker.scheduler_id() == self.job.scheduler_id() {
                return self.help_wait(&worker, interruptible, deadline);
            }
        }
        self.block_until_done(interruptible, deadline)
    }

    pub(crate) fn help_wait(
        &self,
        worker: &Arc<Worker>,
        interruptible: bool,
        deadline: Option<Instant>,
    ) -> bool {
        self.job
            .help_until(worker, || self.is_done(), interruptible, deadline)
            .is_satisfied()
    }

    fn block_until_done(&self, interruptible: bool, deadline: Option<Instant>) -> bool {
        let token = interruptible.then(interrupt::current);
        let mut pending = self.pending.lock();
        let outcome = self
            .pending
            .wait_while(&mut pending, token.as_deref(), deadline, |p| *p > 0);
        if outcome == WaitOutcome::Interrupted {
            debug!(unit_id = %self.id, "wait interrupted");
        }
        outcome.is_satisfied()
    }
}

impl fmt::Debug for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkUnit")
            .field("id", &self.id)
            .field("job_id", &self.job.id())
            .field("owner", &self.owner_id())
            .field("pending", &self.pending())
            .finish()
    }
}

/// Waitable handle to a sub-job (or to a job's root unit).
#[derive(Clone)]
pub struct UnitHandle {
    unit: Arc<WorkUnit>,
}

impl UnitHandle {
    pub(crate) const fn new(unit: Arc<WorkUnit>) -> Self {
        Self { unit }
    }

    pub(crate) const fn unit(&self) -> &Arc<WorkUnit> {
        &self.unit
    }

    /// Identifier of the unit.
    #[must_use]
    pub fn id(&self) -> UnitId {
        self.unit.id()
    }

    /// Job the unit belongs to.
    #[must_use]
    pub fn job_id(&self) -> JobId {
        self.unit.job_id()
    }

    /// Unit that spawned this one; `None` for a job's root.
    #[must_use]
    pub fn owner_id(&self) -> Option<UnitId> {
        self.unit.owner_id()
    }

    /// Outstanding count: own body plus unfinished children.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.unit.pending()
    }

    /// Whether the unit and all of its children are finished.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.unit.is_done()
    }

    /// Whether all children are finished.
    #[must_use]
    pub fn is_flushed(&self) -> bool {
        self.unit.is_flushed()
    }

    /// Block until the unit is done; see [`JobHandle::wait_for`].
    ///
    /// [`JobHandle::wait_for`]: crate::core::JobHandle::wait_for
    pub fn wait_for(&self, interruptible: bool) -> bool {
        self.unit.wait_for(interruptible, None)
    }

    /// Like [`UnitHandle::wait_for`] with a time limit; `false` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.unit.wait_for(false, Some(timeout))
    }

    /// Force the unit done. If it is still queued its body never runs; if it
    /// is running, the body completes but its completion is ignored.
    pub fn abort(&self) {
        self.unit.abort();
    }
}

impl fmt::Debug for UnitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.unit, f)
    }
}
