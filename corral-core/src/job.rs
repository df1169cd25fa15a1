//! Closure-backed work item with an observable lifecycle.
//!
//! [`Job`] is the reference [`WorkItem`] implementation. It guards against
//! double execution with an atomic state transition, records faults instead
//! of letting panics escape, and lets callers wait for a terminal state.

use crate::error::{JobError, JobResult};
use crate::item::{WorkItem, WorkItemState};
use core::fmt;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

type Work = Box<dyn FnOnce() + Send + 'static>;

/// A unique identifier for jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(u64);

impl JobId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Job({})", self.0)
    }
}

/// A one-shot unit of work wrapping a closure.
pub struct Job {
    id: JobId,
    name: Option<&'static str>,
    work: Mutex<Option<Work>>,
    state: AtomicU8,
    queued: AtomicBool,
    outcome: Mutex<Option<JobResult>>,
    finished: Condvar,
}

impl Job {
    /// Create a job from a closure.
    pub fn new<F>(work: F) -> Arc<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        Arc::new(Self::build(None, Box::new(work)))
    }

    /// Create a named job from a closure.
    pub fn named<F>(name: &'static str, work: F) -> Arc<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        Arc::new(Self::build(Some(name), Box::new(work)))
    }

    fn build(name: Option<&'static str>, work: Work) -> Self {
        Self {
            id: JobId::next(),
            name,
            work: Mutex::new(Some(work)),
            state: AtomicU8::new(WorkItemState::Pending as u8),
            queued: AtomicBool::new(false),
            outcome: Mutex::new(None),
            finished: Condvar::new(),
        }
    }

    /// The job's identifier.
    #[must_use]
    pub fn id(&self) -> JobId {
        self.id
    }

    /// The job's debug name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&'static str> {
        self.name
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> WorkItemState {
        WorkItemState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the job reached a terminal state.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// Cancel the job if it has not started.
    ///
    /// Returns `false` if it is already running or finished.
    pub fn cancel(&self) -> bool {
        self.cancel_if_pending()
    }

    fn cancel_if_pending(&self) -> bool {
        if !self.claim(WorkItemState::Cancelled) {
            return false;
        }
        self.work.lock().take();
        self.finish(Err(JobError::Cancelled));
        true
    }

    /// Block until the job reaches a terminal state.
    pub fn wait(&self) -> JobResult {
        let mut outcome = self.outcome.lock();
        loop {
            if let Some(result) = outcome.as_ref() {
                return result.clone();
            }
            self.finished.wait(&mut outcome);
        }
    }

    /// Block until the job reaches a terminal state or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> JobResult {
        let deadline = Instant::now() + timeout;
        let mut outcome = self.outcome.lock();
        loop {
            if let Some(result) = outcome.as_ref() {
                return result.clone();
            }
            if self.finished.wait_until(&mut outcome, deadline).timed_out() {
                return outcome.clone().unwrap_or(Err(JobError::Timeout));
            }
        }
    }

    /// Move from a runnable state into `target`; fails if another thread won.
    fn claim(&self, target: WorkItemState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if !WorkItemState::from_u8(current).is_runnable() {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                target as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn finish(&self, result: JobResult) {
        let state = match &result {
            Ok(()) => WorkItemState::Completed,
            Err(JobError::Cancelled) => WorkItemState::Cancelled,
            Err(_) => WorkItemState::Faulted,
        };
        let mut outcome = self.outcome.lock();
        self.state.store(state as u8, Ordering::Release);
        *outcome = Some(result);
        self.finished.notify_all();
    }
}

impl WorkItem for Job {
    fn execute(&self) {
        let _ = self.try_execute();
    }

    fn try_execute(&self) -> bool {
        if !self.claim(WorkItemState::Running) {
            return false;
        }
        let Some(work) = self.work.lock().take() else {
            self.finish(Ok(()));
            return true;
        };

        let result = panic::catch_unwind(AssertUnwindSafe(work))
            .map_err(|payload| JobError::Faulted(panic_message(payload.as_ref())));
        self.finish(result);
        true
    }

    fn was_previously_queued(&self) -> bool {
        self.queued.load(Ordering::Acquire)
    }

    fn cancel(&self) {
        let _ = self.cancel_if_pending();
    }

    fn mark_queued(&self) {
        self.queued.store(true, Ordering::Release);
        let _ = self.state.compare_exchange(
            WorkItemState::Pending as u8,
            WorkItemState::Queued as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Render a panic payload as text.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
