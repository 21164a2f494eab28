//! The scheduler: a fixed pool of worker threads over a registry of live jobs.
//!
//! Workers discover jobs round-robin from a shared cursor. Every change that
//! can make work available (submission, sub-job spawn, abort, a released
//! quota slot) bumps the registry epoch and notifies; an idle worker sleeps
//! only while the epoch it last scanned is still current, so no wakeup is
//! lost and spurious wakeups just cost one more pass.
//!
//! # Example
//!
//! ```rust,ignore
//! use evo_jobs::config::SchedulerConfig;
//! use evo_jobs::core::{ExecutionInfo, JobMetadata, OptimizationInfo, Scheduler, SecurityInfo};
//!
//! let scheduler = Scheduler::new(SchedulerConfig::default().with_worker_count(4))?;
//! scheduler.start()?;
//!
//! let job = scheduler.submit(
//!     |host| {
//!         for _ in 0..3 {
//!             host.spawn(|_| Ok(()))?;
//!         }
//!         host.flush_children();
//!         Ok(())
//!     },
//!     JobMetadata::new(
//!         ExecutionInfo::new(2),
//!         SecurityInfo::new("researcher"),
//!         OptimizationInfo::new("symbolic-regression"),
//!     ),
//! )?;
//! job.wait_for(false);
//! ```

pub(crate) mod worker;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::builders::JobBuilder;
use crate::config::SchedulerConfig;
use crate::core::activity::{Activity, ActivityState};
use crate::core::error::{AppResult, SchedulerError};
use crate::core::events::{EventListener, JobEvent, ListenerId, ListenerRegistry};
use crate::core::host::Host;
use crate::core::ids::JobId;
use crate::core::job::{Job, JobHandle};
use crate::core::metadata::JobMetadata;
use crate::core::monitor::Monitor;
use crate::core::runnable::{boxed, boxed_runnable, Body, Runnable};
use crate::core::unit::WorkUnit;
use crate::util::interrupt::Interrupter;

use self::worker::Worker;

/// Snapshot of scheduler activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Number of worker threads.
    pub worker_count: usize,
    /// Jobs currently registered.
    pub live_jobs: usize,
    /// Jobs accepted by `submit`.
    pub submitted_jobs: u64,
    /// Jobs whose unit tree finished normally.
    pub completed_jobs: u64,
    /// Jobs that were aborted.
    pub aborted_jobs: u64,
    /// Unit bodies executed (including failed ones).
    pub executed_units: u64,
    /// Unit bodies that returned an error or panicked.
    pub failed_units: u64,
    /// Events published to the listener registry.
    pub published_events: u64,
}

/// Lock-free scheduler counters.
#[derive(Debug, Default)]
pub(crate) struct SchedulerCounters {
    submitted_jobs: AtomicU64,
    completed_jobs: AtomicU64,
    aborted_jobs: AtomicU64,
    executed_units: AtomicU64,
    failed_units: AtomicU64,
    published_events: AtomicU64,
}

impl SchedulerCounters {
    pub(crate) fn record_submitted(&self) {
        self.submitted_jobs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_finished(&self, aborted: bool) {
        let counter = if aborted {
            &self.aborted_jobs
        } else {
            &self.completed_jobs
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_executed(&self) {
        self.executed_units.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed_units.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_published(&self) {
        self.published_events.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current statistics.
    pub(crate) fn snapshot(&self, worker_count: usize, live_jobs: usize) -> SchedulerStats {
        SchedulerStats {
            worker_count,
            live_jobs,
            submitted_jobs: self.submitted_jobs.load(Ordering::Relaxed),
            completed_jobs: self.completed_jobs.load(Ordering::Relaxed),
            aborted_jobs: self.aborted_jobs.load(Ordering::Relaxed),
            executed_units: self.executed_units.load(Ordering::Relaxed),
            failed_units: self.failed_units.load(Ordering::Relaxed),
            published_events: self.published_events.load(Ordering::Relaxed),
        }
    }
}

/// Live jobs plus the discovery cursor and wakeup epoch.
struct Registry {
    open: bool,
    roots: Vec<Arc<WorkUnit>>,
    cursor: usize,
    epoch: u64,
}

impl Registry {
    fn bump(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
    }
}

/// State shared between the scheduler handle, its workers and its jobs.
///
/// The registry lock is innermost: nothing else is locked while holding it.
pub(crate) struct Shared {
    id: Uuid,
    config: SchedulerConfig,
    activity: Activity,
    registry: Monitor<Registry>,
    workers: Vec<Arc<Worker>>,
    listeners: ListenerRegistry,
    counters: SchedulerCounters,
}

impl Shared {
    fn new(config: SchedulerConfig) -> Arc<Self> {
        let id = Uuid::new_v4();
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let workers = (0..config.worker_count)
                .map(|index| {
                    Arc::new(Worker::new(
                        index,
                        &config.thread_name_prefix,
                        id,
                        Weak::clone(weak),
                    ))
                })
                .collect();
            Self {
                id,
                activity: Activity::new("scheduler"),
                registry: Monitor::new(Registry {
                    open: true,
                    roots: Vec::new(),
                    cursor: 0,
                    epoch: 0,
                }),
                workers,
                listeners: ListenerRegistry::new(),
                counters: SchedulerCounters::default(),
                config,
            }
        })
    }

    pub(crate) const fn activity(&self) -> &Activity {
        &self.activity
    }

    pub(crate) const fn counters(&self) -> &SchedulerCounters {
        &self.counters
    }

    /// Work may be available.
    pub(crate) fn signal_work(&self) {
        let mut registry = self.registry.lock();
        registry.bump();
        self.registry.notify_all();
    }

    /// Remove a finished job. Called under the job's root unit lock.
    pub(crate) fn deregister(&self, id: JobId, aborted: bool) {
        let removed = {
            let mut registry = self.registry.lock();
            let position = registry.roots.iter().position(|root| root.job_id() == id);
            if let Some(position) = position {
                registry.roots.remove(position);
                if position < registry.cursor {
                    registry.cursor -= 1;
                }
                if registry.cursor >= registry.roots.len() {
                    registry.cursor = 0;
                }
                registry.bump();
                self.registry.notify_all();
            }
            position.is_some()
        };
        if removed {
            self.counters.record_finished(aborted);
            debug!(job_id = %id, aborted, "job left registry");
        }
    }

    /// Jobs to scan, the cursor to start from, and the epoch they were read
    /// at. `None` once the registry is closed.
    pub(crate) fn snapshot(&self) -> Option<(Vec<Arc<Job>>, usize, u64)> {
        let registry = self.registry.lock();
        if !registry.open {
            return None;
        }
        let jobs = registry
            .roots
            .iter()
            .map(|root| Arc::clone(root.job()))
            .collect();
        Some((jobs, registry.cursor, registry.epoch))
    }

    pub(crate) fn advance_cursor(&self, position: usize) {
        let mut registry = self.registry.lock();
        registry.cursor = if registry.roots.is_empty() {
            0
        } else {
            position % registry.roots.len()
        };
    }

    /// Sleep until the epoch moves past `seen`, the registry closes, or the
    /// worker is interrupted.
    pub(crate) fn wait_for_work(&self, seen: u64, interrupter: &Interrupter) {
        let mut registry = self.registry.lock();
        let _ = self
            .registry
            .wait_while(&mut registry, Some(interrupter), None, |r| {
                r.open && r.epoch == seen
            });
    }

    pub(crate) fn publish(&self, event: &JobEvent) {
        self.counters.record_published();
        self.listeners.dispatch(event);
    }

    fn live_roots(&self) -> Vec<Arc<WorkUnit>> {
        self.registry.lock().roots.clone()
    }

    fn find_root(&self, id: JobId) -> Option<Arc<WorkUnit>> {
        self.registry
            .lock()
            .roots
            .iter()
            .find(|root| root.job_id() == id)
            .cloned()
    }

    fn start_workers(&self) -> Result<(), SchedulerError> {
        for worker in &self.workers {
            if let Err(err) = worker.start(&self.config) {
                warn!(worker = worker.index(), error = %err, "failed to start worker");
                self.close();
                self.interrupt_workers();
                return Err(err);
            }
        }
        info!(
            scheduler_id = %self.id,
            worker_count = self.workers.len(),
            "scheduler started"
        );
        Ok(())
    }

    fn close(&self) {
        let mut registry = self.registry.lock();
        registry.open = false;
        registry.bump();
        self.registry.notify_all();
    }

    /// Interrupt every worker whose executing unit belongs to job `id`.
    pub(crate) fn interrupt_job_workers(&self, id: JobId) -> usize {
        let mut interrupted = 0;
        for worker in &self.workers {
            if worker.current_unit().is_some_and(|unit| unit.job_id() == id) {
                worker.interrupt();
                interrupted += 1;
            }
        }
        interrupted
    }

    fn interrupt_workers(&self) {
        for worker in &self.workers {
            worker.interrupt();
        }
    }

    /// Abort hook: stop discovery, abort every live job, then join workers.
    fn shutdown(&self) {
        info!(scheduler_id = %self.id, "shutting down scheduler");
        self.close();
        self.interrupt_workers();

        let roots = self.live_roots();
        let aborted = roots.len();
        for root in roots {
            root.abort();
        }
        self.registry.wake();
        // Second round for workers that entered a wait after the first.
        self.interrupt_workers();

        let grace = self.config.shutdown_grace();
        for worker in &self.workers {
            worker.join(grace);
        }
        self.activity.finished();
        info!(scheduler_id = %self.id, aborted_jobs = aborted, "scheduler shut down");
    }
}

/// Multi-processor job scheduler.
///
/// Dropping the scheduler aborts it without waiting for the workers; call
/// [`Scheduler::abort`] and [`Scheduler::wait_for`] for an orderly stop.
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Create a scheduler in the `Initialized` state. No threads are started
    /// until [`Scheduler::start`].
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidConfig` if the configuration is invalid.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;
        info!(
            worker_count = config.worker_count,
            thread_name_prefix = %config.thread_name_prefix,
            "scheduler created"
        );
        Ok(Self {
            shared: Shared::new(config),
        })
    }

    /// Create a scheduler with default settings and `worker_count` workers.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidConfig` if `worker_count` is zero.
    pub fn with_worker_count(worker_count: usize) -> Result<Self, SchedulerError> {
        Self::new(SchedulerConfig::default().with_worker_count(worker_count))
    }

    /// Unique id of this scheduler instance.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Configuration the scheduler was built with.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Number of worker threads.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.shared.workers.len()
    }

    /// Start every worker thread.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless the scheduler is `Initialized`; `ThreadSpawn` if
    /// a worker thread could not be created, in which case the scheduler is
    /// left `Terminated`.
    pub fn start(&self) -> Result<(), SchedulerError> {
        self.shared.activity.start(|| self.shared.start_workers())
    }

    /// Begin shutdown: every live job is aborted and the workers stop after
    /// their current body. Returns immediately; `false` if the scheduler was
    /// already stopping.
    pub fn abort(&self) -> bool {
        let shared = Arc::clone(&self.shared);
        self.shared.activity.abort(move || shared.shutdown())
    }

    /// Block until the scheduler is terminated. With `interruptible`, an
    /// interrupt of the calling thread ends the wait early with `false`.
    pub fn wait_for(&self, interruptible: bool) -> bool {
        self.shared.activity.wait_for(interruptible)
    }

    /// Block until terminated or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.shared.activity.wait_timeout(timeout)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ActivityState {
        self.shared.activity.state()
    }

    /// Whether the scheduler is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.activity.is_running()
    }

    /// Whether the scheduler has terminated.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.shared.activity.is_terminated()
    }

    /// Whether the scheduler is terminating or terminated.
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.shared.activity.is_final()
    }

    /// Submit a job. Jobs submitted before [`Scheduler::start`] run once the
    /// workers are up.
    ///
    /// # Errors
    ///
    /// `NotAccepting` if the scheduler is stopping or stopped; `InvalidQuota`
    /// or `MissingMetadata` if the metadata is incomplete.
    pub fn submit<F>(&self, body: F, metadata: JobMetadata) -> Result<JobHandle, SchedulerError>
    where
        F: FnOnce(&Host) -> AppResult<()> + Send + 'static,
    {
        self.submit_body(boxed(body), metadata)
    }

    /// Submit a [`Runnable`] as a job.
    ///
    /// # Errors
    ///
    /// Same as [`Scheduler::submit`].
    pub fn submit_runnable<R: Runnable>(
        &self,
        runnable: R,
        metadata: JobMetadata,
    ) -> Result<JobHandle, SchedulerError> {
        self.submit_body(boxed_runnable(runnable), metadata)
    }

    /// Start building a job's metadata for submission.
    #[must_use]
    pub const fn job(&self) -> JobBuilder<'_> {
        JobBuilder::new(self)
    }

    fn submit_body(&self, body: Body, metadata: JobMetadata) -> Result<JobHandle, SchedulerError> {
        let state = self.state();
        if state.is_final() {
            return Err(SchedulerError::NotAccepting(state));
        }
        metadata.validate()?;

        let job = Arc::new(Job::new(metadata, Arc::downgrade(&self.shared), self.shared.id));
        let root = WorkUnit::root(Arc::clone(&job), body);
        {
            let mut registry = self.shared.registry.lock();
            if !registry.open {
                return Err(SchedulerError::NotAccepting(self.state()));
            }
            registry.roots.push(Arc::clone(&root));
        }
        job.enqueue(Arc::clone(&root));
        self.shared.counters.record_submitted();
        debug!(
            job_id = %job.id(),
            max_workers = job.max_workers(),
            optimization = %job.metadata().optimization.name,
            "job submitted"
        );
        Ok(JobHandle::new(root))
    }

    /// Abort one job, leaving the scheduler running. Returns `false` if the
    /// job is not live.
    pub fn abort_job(&self, id: JobId) -> bool {
        match self.shared.find_root(id) {
            Some(root) => {
                root.abort();
                true
            }
            None => false,
        }
    }

    /// Ids of all registered jobs.
    #[must_use]
    pub fn live_jobs(&self) -> Vec<JobId> {
        self.shared
            .live_roots()
            .iter()
            .map(|root| root.job_id())
            .collect()
    }

    /// Whether `id` is still registered.
    #[must_use]
    pub fn contains_job(&self, id: JobId) -> bool {
        self.shared.find_root(id).is_some()
    }

    /// Register a listener for job events.
    pub fn add_listener(&self, listener: Arc<dyn EventListener>) -> ListenerId {
        self.shared.listeners.add(listener)
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.listeners.remove(id)
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.shared.listeners.len()
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        let live = self.shared.registry.lock().roots.len();
        self.shared.counters.snapshot(self.worker_count(), live)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // Don't join here; the abort thread does that.
        if self.abort() {
            debug!(scheduler_id = %self.shared.id, "scheduler dropped while running, aborting");
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .field("workers", &self.worker_count())
            .finish_non_exhaustive()
    }
}
