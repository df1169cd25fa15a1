//! Error types and handling for the Corral scheduler.

use core::fmt;
use thiserror::Error;

/// Errors raised by the scheduler facade.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Configuration was rejected at construction time
    #[error("invalid scheduler configuration: {0}")]
    InvalidConfiguration(String),
    /// The requested operation is not supported by this scheduler
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    /// A worker thread could not be created
    #[error("failed to spawn worker thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),
}

/// Errors returned when an item cannot be placed in the queue.
///
/// Every variant hands the rejected item back to the caller, so an item is
/// never lost in a half-enqueued state.
#[derive(Error, PartialEq, Eq)]
pub enum EnqueueError<T> {
    /// The queue is at capacity
    #[error("work queue is full")]
    Full(T),
    /// The queue has been closed to further writes
    #[error("work queue is closed")]
    Closed(T),
    /// The wait was abandoned because cancellation fired
    #[error("enqueue was cancelled")]
    Cancelled(T),
}

impl<T> EnqueueError<T> {
    /// Recover the item that could not be enqueued.
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(item) | Self::Closed(item) | Self::Cancelled(item) => item,
        }
    }

    /// Whether the failure was caused by a full queue.
    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full(_))
    }

    /// Whether the failure was caused by cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

// Manual impl so `T` does not need to be `Debug`.
impl<T> fmt::Debug for EnqueueError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("Full(..)"),
            Self::Closed(_) => f.write_str("Closed(..)"),
            Self::Cancelled(_) => f.write_str("Cancelled(..)"),
        }
    }
}

/// Errors returned when no item could be taken from the queue.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum DequeueError {
    /// The queue is empty (non-blocking attempts only)
    #[error("work queue is empty")]
    Empty,
    /// The wait was abandoned because cancellation fired
    #[error("dequeue was cancelled")]
    Cancelled,
    /// The queue is closed and fully drained
    #[error("work queue is closed")]
    Closed,
}

/// Errors observed by callers waiting on a [`Job`](crate::job::Job).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobError {
    /// The job's closure panicked
    #[error("job faulted: {0}")]
    Faulted(String),
    /// The job was cancelled before it ran
    #[error("job was cancelled")]
    Cancelled,
    /// The wait elapsed before the job reached a terminal state
    #[error("timed out waiting for job")]
    Timeout,
}

/// A result type for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// A result type for job waits.
pub type JobResult = Result<(), JobError>;
