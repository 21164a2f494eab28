//! Job events and listener plumbing.
//!
//! Body failures, body panics and explicit reports from running bodies are
//! all delivered as [`JobEvent`]s to every listener registered on the
//! scheduler, tagged with the originating job.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::core::ids::{JobId, UnitId};
use crate::util::clock::now_ms;

/// What an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
    /// A body returned an error.
    BodyFailed,
    /// A body panicked.
    BodyPanicked,
    /// A body called [`Host::report_event`](crate::core::Host::report_event).
    Reported,
}

/// Event tied to the job it originated from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    /// Originating job.
    pub job_id: JobId,
    /// Unit whose body produced the event, when known.
    pub unit_id: Option<UnitId>,
    /// Event category.
    pub kind: JobEventKind,
    /// Human-readable description.
    pub message: String,
    /// Optional structured payload.
    pub payload: Option<serde_json::Value>,
    /// Creation time, milliseconds since the epoch.
    pub created_at_ms: u128,
}

impl JobEvent {
    /// A body-reported event for `job_id`.
    pub fn reported(job_id: JobId, message: impl Into<String>) -> Self {
        Self {
            job_id,
            unit_id: None,
            kind: JobEventKind::Reported,
            message: message.into(),
            payload: None,
            created_at_ms: now_ms(),
        }
    }

    /// Attach a structured payload.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub(crate) fn body_failed(job_id: JobId, unit_id: UnitId, err: &anyhow::Error) -> Self {
        Self {
            job_id,
            unit_id: Some(unit_id),
            kind: JobEventKind::BodyFailed,
            message: format!("{err:#}"),
            payload: None,
            created_at_ms: now_ms(),
        }
    }

    pub(crate) fn body_panicked(job_id: JobId, unit_id: UnitId, message: String) -> Self {
        Self {
            job_id,
            unit_id: Some(unit_id),
            kind: JobEventKind::BodyPanicked,
            message,
            payload: None,
            created_at_ms: now_ms(),
        }
    }
}

/// Extract the message of a caught panic.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Receives job events. Called on the worker thread that produced the event.
pub trait EventListener: Send + Sync {
    /// Handle one event.
    fn on_event(&self, event: &JobEvent);
}

impl<F> EventListener for F
where
    F: Fn(&JobEvent) + Send + Sync,
{
    fn on_event(&self, event: &JobEvent) {
        self(event);
    }
}

/// Registration handle returned by `Scheduler::add_listener`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Listener set owned by a scheduler.
pub(crate) struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn EventListener>)>>,
}

impl ListenerRegistry {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn add(&self, listener: Arc<dyn EventListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Deliver to a snapshot of the listeners, outside the lock. A panicking
    /// listener is logged and skipped.
    pub(crate) fn dispatch(&self, event: &JobEvent) {
        let listeners: Vec<Arc<dyn EventListener>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            let delivered = panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(event)));
            if let Err(payload) = delivered {
                error!(
                    job_id = %event.job_id,
                    panic = %panic_message(&*payload),
                    "event listener panicked"
                );
            }
        }
    }
}

/// In-memory listener that keeps the most recent events. Useful for tests
/// and for test-series tooling that inspects failures after a run.
pub struct InMemoryEventSink {
    events: Mutex<VecDeque<JobEvent>>,
    max_events: usize,
}

impl InMemoryEventSink {
    /// Create a sink holding at most `max_events` events.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(max_events.min(1024))),
            max_events,
        }
    }

    /// Snapshot of stored events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<JobEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Stored events originating from `job_id`.
    #[must_use]
    pub fn events_for(&self, job_id: JobId) -> Vec<JobEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.job_id == job_id)
            .cloned()
            .collect()
    }

    /// Number of stored events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether no events are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Drop all stored events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Default for InMemoryEventSink {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl EventListener for InMemoryEventSink {
    fn on_event(&self, event: &JobEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event.clone());
    }
}

impl fmt::Debug for InMemoryEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryEventSink")
            .field("len", &self.len())
            .field("max_events", &self.max_events)
            .finish()
    }
}
