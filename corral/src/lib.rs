//! # Corral - Keeping the Threads Penned
//!
//! Corral is a bounded worker-pool scheduler. A fixed number of dedicated
//! threads drain one fixed-capacity queue, so a burst of submissions turns
//! into backpressure instead of an ever-growing pool.
//!
//! ## Features
//!
//! - **Fixed concurrency**: exactly `max_concurrency` workers, created up front
//! - **Explicit backpressure**: offload to an overflow thread or spin, never grow
//! - **Safe inline execution**: only on pool threads, never for queued items
//! - **Cooperative shutdown**: external and internal cancellation, bounded joins
//! - **Thread priority**: best-effort OS priority for worker threads

#![deny(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

// Re-export core functionality
pub use corral_core::{
    AdaptiveBackoff, BoundedWorkQueue, CancellationRegistration, CancellationSource,
    CancellationToken, DequeueError, EnqueueError, Job, JobError, JobId, JobResult,
    LinkedCancellation, SchedulerConfig, SchedulerError, SchedulerResult, ThreadPriority,
    WaitPolicy, WorkItem, WorkItemRef, WorkItemState,
};

// Re-export executor functionality
pub use corral_executor::{
    BoundedScheduler, DedicatedOverflowThread, OverflowProducer, OverflowTask, SchedulerBuilder,
    SchedulerState, ShutdownReport, SubmitOutcome, WorkerState,
};

use std::sync::Arc;
use std::time::Duration;

/// A shareable handle to a running bounded scheduler.
///
/// Clones share one scheduler. The workers stop when the last clone is
/// dropped or when [`shutdown`](Self::shutdown) is called on it.
///
/// # Examples
///
/// ```
/// use corral::Corral;
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::sync::Arc;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let runtime = Corral::builder().max_concurrency(2).build()?;
///
/// let counter = Arc::new(AtomicU32::new(0));
/// let jobs: Vec<_> = (0..8)
///     .map(|_| {
///         let counter = counter.clone();
///         runtime.spawn(move || {
///             counter.fetch_add(1, Ordering::Relaxed);
///         })
///     })
///     .collect();
///
/// for job in jobs {
///     job.wait()?;
/// }
/// assert_eq!(counter.load(Ordering::Relaxed), 8);
/// runtime.shutdown();
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
#[derive(Clone)]
pub struct Corral {
    scheduler: Arc<BoundedScheduler>,
}

impl Corral {
    /// Create a runtime with one worker per available CPU.
    ///
    /// # Errors
    ///
    /// Returns an error if a worker thread cannot be created.
    pub fn new() -> SchedulerResult<Self> {
        Self::builder().build()
    }

    /// Create a builder for configuring the runtime.
    #[must_use]
    pub fn builder() -> CorralBuilder {
        CorralBuilder::new()
    }

    /// Submit a closure and get a handle to wait on.
    ///
    /// If the runtime is stopping, the returned job is never run; it is
    /// marked cancelled so waiters do not hang.
    pub fn spawn<F>(&self, work: F) -> Arc<Job>
    where
        F: FnOnce() + Send + 'static,
    {
        let job = Job::new(work);
        if self.scheduler.submit(job.clone()) == SubmitOutcome::Dropped {
            job.cancel();
        }
        job
    }

    /// Submit any work item.
    pub fn submit(&self, item: WorkItemRef) -> SubmitOutcome {
        self.scheduler.submit(item)
    }

    /// Run a never-queued item on the calling worker thread.
    ///
    /// Returns `false` when called off the pool or for a queued item.
    pub fn run_inline(&self, item: &dyn WorkItem) -> bool {
        self.scheduler.try_run_inline(item, item.was_previously_queued())
    }

    /// The underlying scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &BoundedScheduler {
        &self.scheduler
    }

    /// Whether the calling thread is one of this runtime's workers.
    #[must_use]
    pub fn is_worker_thread(&self) -> bool {
        self.scheduler.is_worker_thread()
    }

    /// Stop the runtime.
    ///
    /// If this is the last handle, workers are joined and the report is
    /// returned. Otherwise workers are signalled to stop and `None` is
    /// returned; the last remaining handle finishes the teardown on drop.
    pub fn shutdown(self) -> Option<ShutdownReport> {
        match Arc::try_unwrap(self.scheduler) {
            Ok(scheduler) => Some(scheduler.shutdown()),
            Err(shared) => {
                shared.signal_shutdown();
                None
            }
        }
    }
}

/// Builder for configuring a [`Corral`] runtime.
#[derive(Default)]
pub struct CorralBuilder {
    inner: SchedulerBuilder,
}

impl CorralBuilder {
    /// Create a builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: SchedulerBuilder::new(),
        }
    }

    /// Set the number of worker threads.
    #[must_use]
    pub fn max_concurrency(mut self, count: usize) -> Self {
        self.inner = self.inner.max_concurrency(count);
        self
    }

    /// Set the OS priority of worker threads.
    #[must_use]
    pub fn priority(mut self, priority: ThreadPriority) -> Self {
        self.inner = self.inner.priority(priority);
        self
    }

    /// Set the wait policy.
    #[must_use]
    pub fn wait_policy(mut self, policy: WaitPolicy) -> Self {
        self.inner = self.inner.wait_policy(policy);
        self
    }

    /// Set the queue slots per worker.
    #[must_use]
    pub fn queue_capacity_factor(mut self, factor: usize) -> Self {
        self.inner = self.inner.queue_capacity_factor(factor);
        self
    }

    /// Set the per-worker shutdown timeout.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.inner = self.inner.shutdown_timeout(timeout);
        self
    }

    /// Set the thread name prefix.
    #[must_use]
    pub fn thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.inner = self.inner.thread_name_prefix(prefix);
        self
    }

    /// Stop the runtime when `token` fires.
    #[must_use]
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.inner = self.inner.cancellation_token(token);
        self
    }

    /// Build the runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a worker thread
    /// cannot be created.
    pub fn build(self) -> SchedulerResult<Corral> {
        Ok(Corral {
            scheduler: Arc::new(self.inner.build()?),
        })
    }
}
