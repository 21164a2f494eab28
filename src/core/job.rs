//! Jobs: quota accounting and the per-job work queue.
//!
//! A job owns a LIFO queue of units that have been spawned but not started.
//! Workers pop from the head, so the most recently spawned child runs first
//! and a worker stays inside the part of the tree it just expanded.
//!
//! `assigned` counts the workers currently charged against the job. A
//! worker is charged when it takes work from a job it is not affiliated
//! with, and stays charged (its affinity) until it runs out of work there.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, error, trace, warn};
use uuid::Uuid;

use crate::core::events::{panic_message, JobEvent};
use crate::core::host::Host;
use crate::core::ids::JobId;
use crate::core::metadata::JobMetadata;
use crate::core::monitor::{Monitor, WaitOutcome};
use crate::core::unit::{UnitHandle, WorkUnit};
use crate::core::worker_pool::worker::Worker;
use crate::core::worker_pool::Shared;

/// Queue state guarded by the job's monitor.
struct WorkQueue {
    units: VecDeque<Arc<WorkUnit>>,
    assigned: usize,
    aborted: bool,
}

impl WorkQueue {
    fn has_work_for(&self, affiliated: bool, max_workers: usize) -> bool {
        !self.units.is_empty() && (affiliated || self.assigned < max_workers)
    }
}

/// How a worker was charged when it took a unit.
enum Charge {
    /// Already affiliated with this job.
    Kept,
    /// Had no affiliation; now charged here.
    Fresh,
    /// Moved over from another job, which was uncharged.
    Switched(Arc<Job>),
}

/// A top-level unit of submitted work.
pub(crate) struct Job {
    id: JobId,
    metadata: Arc<JobMetadata>,
    max_workers: usize,
    queue: Monitor<WorkQueue>,
    aborted: AtomicBool,
    scheduler: Weak<Shared>,
    scheduler_id: Uuid,
}

impl Job {
    pub(crate) fn new(metadata: JobMetadata, scheduler: Weak<Shared>, scheduler_id: Uuid) -> Self {
        Self {
            id: JobId::next(),
            max_workers: metadata.max_workers(),
            metadata: Arc::new(metadata),
            queue: Monitor::new(WorkQueue {
                units: VecDeque::new(),
                assigned: 0,
                aborted: false,
            }),
            aborted: AtomicBool::new(false),
            scheduler,
            scheduler_id,
        }
    }

    pub(crate) const fn id(&self) -> JobId {
        self.id
    }

    pub(crate) fn metadata(&self) -> &Arc<JobMetadata> {
        &self.metadata
    }

    pub(crate) const fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub(crate) const fn scheduler_id(&self) -> Uuid {
        self.scheduler_id
    }

    pub(crate) fn assigned_workers(&self) -> usize {
        self.queue.lock().assigned
    }

    pub(crate) fn queued_units(&self) -> usize {
        self.queue.lock().units.len()
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Push a unit onto the head of the queue. Returns `false` if the job was
    /// aborted, in which case the unit is not queued.
    pub(crate) fn enqueue(&self, unit: Arc<WorkUnit>) -> bool {
        {
            let mut queue = self.queue.lock();
            if queue.aborted {
                return false;
            }
            queue.units.push_front(unit);
            self.queue.notify_all();
        }
        self.signal_scheduler();
        true
    }

    /// Wake workers waiting on this job for a unit to finish or flush.
    pub(crate) fn notify_progress(&self) {
        self.queue.wake();
    }

    fn signal_scheduler(&self) {
        if let Some(shared) = self.scheduler.upgrade() {
            shared.signal_work();
        }
    }

    /// Pop the next unit for `worker`, charging it against the quota.
    fn try_take_work(self: &Arc<Self>, worker: &Worker) -> Option<(Arc<WorkUnit>, Charge)> {
        let affinity = worker.affinity();
        let affiliated = affinity.as_ref().is_some_and(|job| Arc::ptr_eq(job, self));

        let unit = {
            let mut queue = self.queue.lock();
            if !affiliated && queue.assigned >= self.max_workers {
                return None;
            }
            let unit = queue.units.pop_front()?;
            if !affiliated {
                queue.assigned += 1;
            }
            unit
        };

        let charge = if affiliated {
            Charge::Kept
        } else {
            worker.set_affinity(Some(Arc::clone(self)));
            match affinity {
                Some(previous) => {
                    previous.release_worker();
                    Charge::Switched(previous)
                }
                None => Charge::Fresh,
            }
        };
        Some((unit, charge))
    }

    /// Run one queued unit on `worker`. Returns `false` if none was available
    /// to this worker.
    pub(crate) fn run_one(self: &Arc<Self>, worker: &Arc<Worker>) -> bool {
        let Some((unit, charge)) = self.try_take_work(worker) else {
            return false;
        };

        let previous = worker.replace_current_unit(Some(Arc::clone(&unit)));
        if unit.is_done() {
            trace!(job_id = %self.id, unit_id = %unit.id(), "skipping aborted unit");
        } else {
            self.execute(worker, &unit);
        }
        unit.one_finished();
        let resumes_same_job = previous.as_ref().is_some_and(|outer| outer.job_id() == self.id);
        worker.replace_current_unit(previous);
        // An abort interrupt stays pending only while this job's bodies run.
        if self.is_aborted() && !resumes_same_job && worker.interrupter().take() {
            trace!(job_id = %self.id, worker = worker.index(), "cleared interrupt left by job abort");
        }

        match charge {
            Charge::Kept => {}
            Charge::Fresh => {
                trace!(job_id = %self.id, worker = worker.index(), "worker affiliated with job");
            }
            Charge::Switched(previous_job) => {
                // The charge goes back without a quota check: until this
                // worker leaves `previous_job` it may be one over its quota.
                self.release_worker();
                previous_job.charge_worker();
                worker.set_affinity(Some(previous_job));
            }
        }
        true
    }

    /// Run a unit's body, converting failures into events.
    fn execute(&self, worker: &Arc<Worker>, unit: &Arc<WorkUnit>) {
        let Some(body) = unit.take_body() else {
            return;
        };
        let host = Host::new(Arc::clone(worker), Arc::clone(unit));
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(&host)));

        let Some(shared) = self.scheduler.upgrade() else {
            return;
        };
        shared.counters().record_executed();
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(
                    job_id = %self.id,
                    unit_id = %unit.id(),
                    error = %format!("{err:#}"),
                    "unit body failed"
                );
                shared.counters().record_failed();
                shared.publish(&JobEvent::body_failed(self.id, unit.id(), &err));
            }
            Err(payload) => {
                let message = panic_message(&*payload);
                error!(
                    job_id = %self.id,
                    unit_id = %unit.id(),
                    panic = %message,
                    "unit body panicked"
                );
                shared.counters().record_failed();
                shared.publish(&JobEvent::body_panicked(self.id, unit.id(), message));
            }
        }
    }

    /// Keep running this job's work on `worker` until `done` holds.
    ///
    /// When the queue has nothing this worker may take, the worker sleeps on
    /// the job's monitor until a unit is queued, the quota frees up, or a
    /// unit finishes.
    pub(crate) fn help_until<F>(
        self: &Arc<Self>,
        worker: &Arc<Worker>,
        done: F,
        interruptible: bool,
        deadline: Option<Instant>,
    ) -> WaitOutcome
    where
        F: Fn() -> bool,
    {
        loop {
            if done() {
                return WaitOutcome::Satisfied;
            }
            if interruptible && worker.interrupter().take() {
                return WaitOutcome::Interrupted;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return WaitOutcome::TimedOut;
            }
            if self.run_one(worker) {
                continue;
            }

            let affiliated = worker.is_affiliated_with(self);
            let token = interruptible.then(|| worker.interrupter());
            let mut queue = self.queue.lock();
            let outcome = self.queue.wait_while(&mut queue, token, deadline, |q| {
                !done() && !q.has_work_for(affiliated, self.max_workers)
            });
            if outcome != WaitOutcome::Satisfied {
                return outcome;
            }
        }
    }

    /// Run this job's work until the unit executing on `worker` is flushed.
    pub(crate) fn flush(self: &Arc<Self>, worker: &Arc<Worker>, unit: &WorkUnit) {
        let _ = self.help_until(worker, || unit.is_flushed(), false, None);
    }

    /// Uncharge one worker; wakes anyone the freed quota lets in.
    pub(crate) fn release_worker(&self) {
        let has_work = {
            let mut queue = self.queue.lock();
            queue.assigned = queue.assigned.saturating_sub(1);
            self.queue.notify_all();
            !queue.units.is_empty()
        };
        if has_work {
            self.signal_scheduler();
        }
    }

    fn charge_worker(&self) {
        self.queue.lock().assigned += 1;
    }

    /// Mark the job aborted, abort every queued unit (most recent first) and
    /// interrupt the workers still executing its units.
    pub(crate) fn abort_queued(&self) {
        let drained: Vec<Arc<WorkUnit>> = {
            let mut queue = self.queue.lock();
            queue.aborted = true;
            self.aborted.store(true, Ordering::Release);
            queue.units.drain(..).collect()
        };
        debug!(job_id = %self.id, queued = drained.len(), "aborting queued units");
        for unit in drained.iter().filter(|unit| !unit.is_root()) {
            unit.abort();
        }

        let Some(shared) = self.scheduler.upgrade() else {
            return;
        };
        let interrupted = shared.interrupt_job_workers(self.id);
        if interrupted > 0 {
            debug!(job_id = %self.id, interrupted, "interrupted workers running aborted job");
        }
        shared.signal_work();
    }

    /// The root unit reached zero. Called under the root unit's lock, so
    /// this must not touch the queue.
    pub(crate) fn finished(&self) {
        if let Some(shared) = self.scheduler.upgrade() {
            shared.deregister(self.id, self.is_aborted());
        }
    }

    /// Drop units still queued after the root finished (aborted sub-jobs
    /// that were never popped).
    pub(crate) fn release_queue(&self) {
        let leftover = std::mem::take(&mut self.queue.lock().units);
        if !leftover.is_empty() {
            trace!(job_id = %self.id, count = leftover.len(), "released leftover units");
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = self.queue.lock();
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("max_workers", &self.max_workers)
            .field("assigned", &queue.assigned)
            .field("queued", &queue.units.len())
            .field("aborted", &queue.aborted)
            .finish_non_exhaustive()
    }
}

/// Waitable handle to a submitted job.
#[derive(Clone)]
pub struct JobHandle {
    root: Arc<WorkUnit>,
}

impl JobHandle {
    pub(crate) const fn new(root: Arc<WorkUnit>) -> Self {
        Self { root }
    }

    /// The job's id.
    #[must_use]
    pub fn id(&self) -> JobId {
        self.root.job_id()
    }

    /// Metadata supplied at submission.
    #[must_use]
    pub fn metadata(&self) -> Arc<JobMetadata> {
        Arc::clone(self.root.job().metadata())
    }

    /// The job's quota.
    #[must_use]
    pub fn max_workers(&self) -> usize {
        self.root.job().max_workers()
    }

    /// Workers currently charged against the quota.
    #[must_use]
    pub fn assigned_workers(&self) -> usize {
        self.root.job().assigned_workers()
    }

    /// Units spawned but not yet started.
    #[must_use]
    pub fn queued_units(&self) -> usize {
        self.root.job().queued_units()
    }

    /// Whether the job has been aborted.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.root.job().is_aborted()
    }

    /// Whether the job's whole unit tree is finished.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.root.is_done()
    }

    /// Handle to the job's root unit.
    #[must_use]
    pub fn root(&self) -> UnitHandle {
        UnitHandle::new(Arc::clone(&self.root))
    }

    /// Block until the job is done.
    ///
    /// Called from one of this scheduler's workers, the wait runs the job's
    /// queued units instead of blocking. With `interruptible`, an interrupt
    /// of the calling thread (see [`crate::util::interrupt::current`]) ends
    /// the wait early and `false` is returned; the job keeps running.
    pub fn wait_for(&self, interruptible: bool) -> bool {
        self.root.wait_for(interruptible, None)
    }

    /// Like [`JobHandle::wait_for`] with a time limit; `false` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.root.wait_for(false, Some(timeout))
    }

    /// Await completion from async code.
    ///
    /// The blocking wait runs on tokio's blocking pool.
    #[cfg(feature = "tokio-runtime")]
    pub async fn wait_async(&self) -> bool {
        let root = Arc::clone(&self.root);
        tokio::task::spawn_blocking(move || root.wait_for(false, None))
            .await
            .unwrap_or(false)
    }

    /// Abort the job: queued units are finished without running, the job
    /// leaves the registry and waiters are released. Bodies already running
    /// finish on their own.
    pub fn abort(&self) {
        self.root.abort();
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("job", self.root.job())
            .field("pending", &self.root.pending())
            .finish()
    }
}
