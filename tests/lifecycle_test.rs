//! Scheduler lifecycle tests
//!
//! Start/abort/wait transitions, submission rules in each state, and
//! shutdown while jobs are still live.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::bounded;
use evo_jobs::config::SchedulerConfig;
use evo_jobs::core::{
    ActivityState, ExecutionInfo, Host, JobMetadata, OptimizationInfo, Scheduler, SchedulerError,
    SecurityInfo,
};

const LIMIT: Duration = Duration::from_secs(10);

fn metadata() -> JobMetadata {
    JobMetadata::new(
        ExecutionInfo::new(2),
        SecurityInfo::new("tester"),
        OptimizationInfo::new("lifecycle"),
    )
}

#[test]
fn test_start_twice_is_invalid_state() {
    let scheduler = Scheduler::with_worker_count(2).unwrap();
    assert_eq!(scheduler.state(), ActivityState::Initialized);
    scheduler.start().unwrap();
    assert!(scheduler.is_running());

    let err = scheduler.start().unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::InvalidState {
            expected: ActivityState::Initialized,
            actual: ActivityState::Running,
            ..
        }
    ));

    assert!(scheduler.abort());
    assert!(scheduler.is_final());
    assert!(!scheduler.abort());
    assert!(scheduler.wait_timeout(LIMIT));
    assert!(scheduler.is_terminated());
    assert!(scheduler.start().is_err());
}

#[test]
fn test_jobs_submitted_before_start_run_after_start() {
    let scheduler = Scheduler::with_worker_count(2).unwrap();
    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);
    let job = scheduler
        .submit(
            move |_| {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            },
            metadata(),
        )
        .unwrap();

    thread::sleep(Duration::from_millis(20));
    assert!(!ran.load(Ordering::SeqCst));
    assert!(scheduler.contains_job(job.id()));

    scheduler.start().unwrap();
    assert!(job.wait_timeout(LIMIT));
    assert!(ran.load(Ordering::SeqCst));

    scheduler.abort();
    assert!(scheduler.wait_for(false));
}

#[test]
fn test_submit_after_abort_is_rejected() {
    let scheduler = Scheduler::with_worker_count(1).unwrap();
    scheduler.start().unwrap();
    scheduler.abort();

    let err = scheduler.submit(|_| Ok(()), metadata()).unwrap_err();
    assert!(matches!(err, SchedulerError::NotAccepting(_)));
    assert!(scheduler.wait_timeout(LIMIT));

    let err = scheduler.submit(|_| Ok(()), metadata()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "scheduler is not accepting jobs (state: terminated)"
    );
}

#[test]
fn test_invalid_metadata_is_rejected() {
    let scheduler = Scheduler::with_worker_count(1).unwrap();
    let zero_quota = JobMetadata::new(
        ExecutionInfo::new(0),
        SecurityInfo::new("tester"),
        OptimizationInfo::new("lifecycle"),
    );
    assert!(matches!(
        scheduler.submit(|_| Ok(()), zero_quota),
        Err(SchedulerError::InvalidQuota(0))
    ));

    let anonymous = JobMetadata::new(
        ExecutionInfo::new(1),
        SecurityInfo::new("  "),
        OptimizationInfo::new("lifecycle"),
    );
    assert!(matches!(
        scheduler.submit(|_| Ok(()), anonymous),
        Err(SchedulerError::MissingMetadata("security.principal"))
    ));
    assert_eq!(scheduler.stats().submitted_jobs, 0);
}

#[test]
fn test_abort_scheduler_aborts_live_jobs() {
    let scheduler = Scheduler::new(
        SchedulerConfig::new()
            .with_worker_count(2)
            .with_shutdown_grace_ms(5_000),
    )
    .unwrap();
    scheduler.start().unwrap();

    let (started_tx, started_rx) = bounded::<()>(1);
    let queued_ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&queued_ran);
    let job = scheduler
        .submit(
            move |host| {
                for _ in 0..4 {
                    let counter = Arc::clone(&counter);
                    host.spawn(move |_| {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })?;
                }
                started_tx.send(())?;
                // Cooperative cancellation.
                while !host.is_cancelled() {
                    thread::sleep(Duration::from_millis(1));
                }
                Ok(())
            },
            JobMetadata::new(
                ExecutionInfo::new(1),
                SecurityInfo::new("tester"),
                OptimizationInfo::new("long-run"),
            ),
        )
        .unwrap();

    started_rx.recv_timeout(LIMIT).unwrap();
    assert!(scheduler.abort());
    assert!(job.wait_timeout(LIMIT));
    assert!(job.is_aborted());
    assert!(scheduler.wait_timeout(LIMIT));
    assert!(scheduler.live_jobs().is_empty());
    assert_eq!(queued_ran.load(Ordering::SeqCst), 0);

    let stats = scheduler.stats();
    assert_eq!(stats.aborted_jobs, 1);
    assert_eq!(stats.completed_jobs, 0);
}

#[test]
fn test_abort_single_job_keeps_scheduler_running() {
    let scheduler = Scheduler::with_worker_count(2).unwrap();
    scheduler.start().unwrap();

    let (started_tx, started_rx) = bounded::<()>(1);
    let stuck = scheduler
        .submit(
            move |host| {
                started_tx.send(())?;
                while !host.is_cancelled() {
                    thread::sleep(Duration::from_millis(1));
                }
                Ok(())
            },
            metadata(),
        )
        .unwrap();
    started_rx.recv_timeout(LIMIT).unwrap();

    assert!(scheduler.abort_job(stuck.id()));
    assert!(!scheduler.abort_job(stuck.id()));
    assert!(stuck.wait_timeout(LIMIT));
    assert!(scheduler.is_running());

    let next = scheduler.submit(|_| Ok(()), metadata()).unwrap();
    assert!(next.wait_timeout(LIMIT));

    scheduler.abort();
    assert!(scheduler.wait_timeout(LIMIT));
}

#[test]
fn test_job_abort_interrupts_running_body() {
    let scheduler = Scheduler::with_worker_count(1).unwrap();
    scheduler.start().unwrap();
    // Never started, so its job only finishes when aborted.
    let idle = Scheduler::with_worker_count(1).unwrap();
    let parked = idle.submit(|_| Ok(()), metadata()).unwrap();

    let (started_tx, started_rx) = bounded::<()>(1);
    let (done_tx, done_rx) = bounded::<bool>(1);
    let job = scheduler
        .submit(
            move |_| {
                started_tx.send(())?;
                done_tx.send(parked.wait_for(true))?;
                Ok(())
            },
            metadata(),
        )
        .unwrap();

    started_rx.recv_timeout(LIMIT).unwrap();
    job.abort();

    let completed = done_rx
        .recv_timeout(LIMIT)
        .expect("body still waiting after its job was aborted");
    assert!(!completed);
    assert!(job.wait_timeout(LIMIT));
    assert!(job.is_aborted());
    assert!(!scheduler.contains_job(job.id()));

    // The same worker picks up the next job without a leftover interrupt.
    let (tx, rx) = bounded::<bool>(1);
    let next = scheduler
        .submit(
            move |host| {
                tx.send(host.is_cancelled())?;
                Ok(())
            },
            metadata(),
        )
        .unwrap();
    assert!(!rx.recv_timeout(LIMIT).unwrap());
    assert!(next.wait_timeout(LIMIT));

    scheduler.abort();
    idle.abort();
    assert!(scheduler.wait_timeout(LIMIT));
    assert!(idle.wait_timeout(LIMIT));
}

#[test]
fn test_host_only_available_inside_bodies() {
    assert!(Host::current().is_none());
    assert!(matches!(
        Host::try_current(),
        Err(SchedulerError::NoCurrentUnit)
    ));

    let scheduler = Scheduler::with_worker_count(1).unwrap();
    scheduler.start().unwrap();
    let (tx, rx) = bounded::<(bool, bool, String)>(1);
    let job = scheduler
        .submit(
            move |host| {
                let ambient = Host::current();
                let same_job = ambient.as_ref().is_some_and(|h| h.job_id() == host.job_id());
                let same_unit = ambient.as_ref().is_some_and(|h| h.unit_id() == host.unit_id());
                let name = host.job_metadata().optimization.name.clone();
                tx.send((same_job, same_unit, name))?;
                Ok(())
            },
            metadata(),
        )
        .unwrap();

    let (same_job, same_unit, name) = rx.recv_timeout(LIMIT).unwrap();
    assert!(same_job);
    assert!(same_unit);
    assert_eq!(name, "lifecycle");
    assert!(job.wait_timeout(LIMIT));

    scheduler.abort();
    assert!(scheduler.wait_timeout(LIMIT));
}

#[test]
fn test_worker_random_source() {
    use rand::Rng;

    let scheduler = Scheduler::with_worker_count(1).unwrap();
    scheduler.start().unwrap();
    let (tx, rx) = bounded::<Vec<u64>>(1);
    let job = scheduler
        .submit(
            move |host| {
                let draws = (0..8)
                    .map(|_| host.with_random(|rng| rng.random::<u64>()))
                    .collect();
                host.defer();
                tx.send(draws)?;
                Ok(())
            },
            metadata(),
        )
        .unwrap();
    let draws = rx.recv_timeout(LIMIT).unwrap();
    assert!(job.wait_timeout(LIMIT));
    assert_eq!(draws.len(), 8);
    assert!(draws.windows(2).any(|pair| pair[0] != pair[1]));

    scheduler.abort();
    assert!(scheduler.wait_timeout(LIMIT));
}
