//! Capability handed to running bodies.

use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;

use rand::rngs::StdRng;
use tracing::warn;

use crate::core::error::SchedulerError;
use crate::core::events::JobEvent;
use crate::core::ids::{JobId, UnitId};
use crate::core::metadata::JobMetadata;
use crate::core::runnable::{boxed, boxed_runnable, Body, Runnable};
use crate::core::unit::{UnitHandle, WorkUnit};
use crate::core::worker_pool::worker::Worker;
use crate::core::AppResult;

/// What a body may do with the scheduler: spawn sub-jobs, flush them, wait
/// on units, report events, and use its worker's random source.
///
/// A `Host` is bound to the worker thread and unit it was created for, so
/// it is neither `Send` nor `Sync`.
pub struct Host {
    worker: Arc<Worker>,
    unit: Arc<WorkUnit>,
    _not_send: PhantomData<Rc<()>>,
}

impl Host {
    pub(crate) const fn new(worker: Arc<Worker>, unit: Arc<WorkUnit>) -> Self {
        Self {
            worker,
            unit,
            _not_send: PhantomData,
        }
    }

    /// Host for the body executing on the calling thread.
    ///
    /// `None` off the scheduler's worker threads or between bodies. Bodies
    /// should prefer the `&Host` they are called with.
    #[must_use]
    pub fn current() -> Option<Self> {
        let worker = Worker::current()?;
        let unit = worker.current_unit()?;
        Some(Self::new(worker, unit))
    }

    /// Like [`Host::current`], as an error for callers that propagate.
    ///
    /// # Errors
    ///
    /// `SchedulerError::NoCurrentUnit` when no body is executing on the
    /// calling thread.
    pub fn try_current() -> Result<Self, SchedulerError> {
        Self::current().ok_or(SchedulerError::NoCurrentUnit)
    }

    /// Job the executing unit belongs to.
    #[must_use]
    pub fn job_id(&self) -> JobId {
        self.unit.job_id()
    }

    /// The executing unit.
    #[must_use]
    pub fn unit_id(&self) -> UnitId {
        self.unit.id()
    }

    /// Index of the worker running this body.
    #[must_use]
    pub fn worker_index(&self) -> usize {
        self.worker.index()
    }

    /// Metadata of the current job.
    #[must_use]
    pub fn job_metadata(&self) -> Arc<JobMetadata> {
        Arc::clone(self.unit.job().metadata())
    }

    /// Workers currently charged against the current job's quota.
    #[must_use]
    pub fn assigned_workers(&self) -> usize {
        self.unit.job().assigned_workers()
    }

    /// Spawn a sub-job of the executing unit.
    ///
    /// # Errors
    ///
    /// `JobAborted` if the job was aborted, `UnitFinished` if the unit was
    /// already forced done.
    pub fn spawn<F>(&self, body: F) -> Result<UnitHandle, SchedulerError>
    where
        F: FnOnce(&Self) -> AppResult<()> + Send + 'static,
    {
        self.spawn_body(boxed(body))
    }

    /// Spawn a [`Runnable`] as a sub-job of the executing unit.
    ///
    /// # Errors
    ///
    /// Same as [`Host::spawn`].
    pub fn spawn_runnable<R: Runnable>(&self, runnable: R) -> Result<UnitHandle, SchedulerError> {
        self.spawn_body(boxed_runnable(runnable))
    }

    fn spawn_body(&self, body: Body) -> Result<UnitHandle, SchedulerError> {
        self.unit.spawn_child(body).map(UnitHandle::new)
    }

    /// Return once every sub-job spawned by this unit so far is done,
    /// running queued work of the job in the meantime.
    pub fn flush_children(&self) {
        self.unit.job().flush(&self.worker, &self.unit);
    }

    /// Wait for `handle`, running queued work of its job instead of
    /// blocking. A handle from another scheduler is waited on normally.
    pub fn wait_for(&self, handle: &UnitHandle, interruptible: bool) -> bool {
        let unit = handle.unit();
        if unit.job().scheduler_id() != self.worker.scheduler_id() {
            return handle.wait_for(interruptible);
        }
        unit.help_wait(&self.worker, interruptible, None)
    }

    /// Run `f` with this worker's random source.
    ///
    /// Each worker owns one generator, seeded from the OS when the worker is
    /// created. Do not call back into the host from inside `f`.
    pub fn with_random<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        self.worker.with_random(f)
    }

    /// Cooperative yield.
    pub fn defer(&self) {
        thread::yield_now();
    }

    /// Whether the job was aborted, the worker was told to stop, or the
    /// scheduler is shutting down. Long bodies should poll this.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.unit.job().is_aborted()
            || self.worker.interrupter().is_interrupted()
            || self
                .worker
                .shared()
                .map_or(true, |shared| !shared.activity().is_running())
    }

    /// Publish `event` to the scheduler's listeners.
    ///
    /// # Errors
    ///
    /// `SecurityViolation` if the event names a job other than the current
    /// one; `NotAccepting` if the scheduler is gone.
    pub fn report_event(&self, event: JobEvent) -> Result<(), SchedulerError> {
        let actual = self.job_id();
        if event.job_id != actual {
            warn!(
                claimed = %event.job_id,
                actual = %actual,
                unit_id = %self.unit.id(),
                "rejected event reported for another job"
            );
            return Err(SchedulerError::SecurityViolation {
                claimed: event.job_id,
                actual,
            });
        }
        let shared = self.worker.shared()?;
        shared.publish(&event);
        Ok(())
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("worker", &self.worker.index())
            .field("unit", &self.unit.id())
            .field("job", &self.unit.job_id())
            .finish()
    }
}
