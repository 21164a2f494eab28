//! Job body abstraction.

use crate::core::error::AppResult;
use crate::core::host::Host;

/// Boxed body as stored on a work unit.
pub(crate) type Body = Box<dyn FnOnce(&Host) -> AppResult<()> + Send + 'static>;

/// A reusable unit of work that can be submitted as a job or spawned as a
/// sub-job.
///
/// Closures `FnOnce(&Host) -> AppResult<()>` can be passed directly to
/// [`Scheduler::submit`](crate::core::Scheduler::submit) and
/// [`Host::spawn`]; implement this trait for bodies that carry their own
/// state.
///
/// # Example
///
/// ```rust,ignore
/// use evo_jobs::core::{AppResult, Host, Runnable};
///
/// struct Evaluate {
///     individual: Vec<f64>,
/// }
///
/// impl Runnable for Evaluate {
///     fn run(self, host: &Host) -> AppResult<()> {
///         let noise = host.with_random(|rng| rand::Rng::random::<f64>(rng));
///         let _fitness: f64 = self.individual.iter().sum::<f64>() + noise;
///         Ok(())
///     }
/// }
/// ```
pub trait Runnable: Send + 'static {
    /// Execute the body.
    ///
    /// # Errors
    ///
    /// Any error is caught by the scheduler and reported as a
    /// [`JobEvent`](crate::core::JobEvent) against the owning job; it never
    /// reaches the worker thread.
    fn run(self, host: &Host) -> AppResult<()>;
}

pub(crate) fn boxed<F>(body: F) -> Body
where
    F: FnOnce(&Host) -> AppResult<()> + Send + 'static,
{
    Box::new(body)
}

pub(crate) fn boxed_runnable<R: Runnable>(runnable: R) -> Body {
    Box::new(move |host: &Host| runnable.run(host))
}
