//! Scheduler configuration.

use crate::error::{SchedulerError, SchedulerResult};
use core::fmt;
use std::time::Duration;

/// Default queue slots reserved per worker.
pub const DEFAULT_QUEUE_CAPACITY_FACTOR: usize = 128;

/// Default time to wait for each worker to join during shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default prefix for worker thread names.
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "corral-worker";

/// OS scheduling priority applied to worker threads.
///
/// Applied on a best-effort basis; raising priority usually needs elevated
/// privileges and silently degrades to `Normal` when refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ThreadPriority {
    /// Background work
    Lowest,
    /// Slightly below the process default
    BelowNormal,
    /// The process default
    #[default]
    Normal,
    /// Slightly above the process default
    AboveNormal,
    /// Latency-sensitive work
    Highest,
}

impl ThreadPriority {
    /// Unix nice value for this priority.
    #[must_use]
    pub const fn nice_value(self) -> i32 {
        match self {
            Self::Lowest => 10,
            Self::BelowNormal => 5,
            Self::Normal => 0,
            Self::AboveNormal => -5,
            Self::Highest => -10,
        }
    }
}

impl fmt::Display for ThreadPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lowest => write!(f, "Lowest"),
            Self::BelowNormal => write!(f, "BelowNormal"),
            Self::Normal => write!(f, "Normal"),
            Self::AboveNormal => write!(f, "AboveNormal"),
            Self::Highest => write!(f, "Highest"),
        }
    }
}

/// How submitters and workers wait on the bounded queue.
///
/// One policy drives both sides so the scheduler never mixes a spinning
/// producer with a parked consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WaitPolicy {
    /// Overflowing submissions are handed to an auxiliary producer; the
    /// submitter never blocks. Idle workers park on a condition variable.
    #[default]
    Parking,
    /// Overflowing submitters spin-poll with adaptive back-off. Idle workers
    /// spin-poll the queue the same way.
    Spinning,
}

impl fmt::Display for WaitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parking => write!(f, "Parking"),
            Self::Spinning => write!(f, "Spinning"),
        }
    }
}

/// Configuration for a bounded scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of worker threads; fixed for the scheduler's lifetime
    pub max_concurrency: usize,
    /// Priority applied to every worker thread
    pub priority: ThreadPriority,
    /// Queue wait policy for submitters and workers
    pub wait_policy: WaitPolicy,
    /// Queue slots per worker; capacity is `max_concurrency * factor`
    pub queue_capacity_factor: usize,
    /// Per-worker join timeout during shutdown
    pub shutdown_timeout: Duration,
    /// Thread name prefix for worker threads
    pub thread_name_prefix: String,
}

impl SchedulerConfig {
    /// Configuration with `max_concurrency` workers and defaults elsewhere.
    #[must_use]
    pub fn with_concurrency(max_concurrency: usize) -> Self {
        Self {
            max_concurrency,
            ..Self::default()
        }
    }

    /// Reject configurations the scheduler cannot run with.
    ///
    /// # Errors
    /// Returns `InvalidConfiguration` when the worker count or capacity
    /// factor is zero, or the queue capacity overflows.
    pub fn validate(&self) -> SchedulerResult<()> {
        if self.max_concurrency == 0 {
            return Err(SchedulerError::InvalidConfiguration(
                "max_concurrency must be greater than zero".into(),
            ));
        }
        if self.queue_capacity_factor == 0 {
            return Err(SchedulerError::InvalidConfiguration(
                "queue_capacity_factor must be greater than zero".into(),
            ));
        }
        self.queue_capacity().map(|_| ())
    }

    /// Queue capacity derived from concurrency and the capacity factor.
    ///
    /// # Errors
    /// Returns `InvalidConfiguration` if the product overflows.
    pub fn queue_capacity(&self) -> SchedulerResult<usize> {
        self.max_concurrency
            .checked_mul(self.queue_capacity_factor)
            .ok_or_else(|| {
                SchedulerError::InvalidConfiguration(format!(
                    "queue capacity {} x {} overflows",
                    self.max_concurrency, self.queue_capacity_factor
                ))
            })
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: num_cpus(),
            priority: ThreadPriority::Normal,
            wait_policy: WaitPolicy::Parking,
            queue_capacity_factor: DEFAULT_QUEUE_CAPACITY_FACTOR,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.into(),
        }
    }
}

// Helper function to get number of CPUs
fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}
