//! The bounded scheduler facade.
//!
//! [`BoundedScheduler`] owns the queue, the worker pool, the cancellation
//! link and the overflow producer behind the narrow surface a host needs.

use crate::overflow::{DedicatedOverflowThread, OverflowProducer};
use crate::pool::{WorkerPool, WorkerState};
use corral_core::{
    BoundedWorkQueue, CancellationToken, EnqueueError, LinkedCancellation, SchedulerConfig,
    SchedulerError, SchedulerResult, ThreadPriority, WaitPolicy, WorkItem, WorkItemRef,
};
use core::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What happened to a submitted item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubmitOutcome {
    /// Placed in the queue
    Enqueued,
    /// Handed to the overflow producer, which will enqueue it later
    Offloaded,
    /// Silently discarded because the scheduler is stopping
    Dropped,
}

/// Scheduler lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SchedulerState {
    /// Queue and cancellation link built, workers not yet spawned
    Constructed = 0,
    /// Workers running
    Running = 1,
    /// Stop signalled, workers exiting
    ShuttingDown = 2,
    /// Workers joined or abandoned, resources released
    Disposed = 3,
}

impl SchedulerState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Constructed,
            1 => Self::Running,
            2 => Self::ShuttingDown,
            _ => Self::Disposed,
        }
    }
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constructed => write!(f, "Constructed"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
            Self::Disposed => write!(f, "Disposed"),
        }
    }
}

/// Summary of a completed shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Workers that exited within the shutdown timeout
    pub joined: usize,
    /// Indices of workers that did not, and were detached
    pub abandoned: Vec<usize>,
    /// Items that never ran: left in the queue or refused during offload
    pub discarded: usize,
    /// Whether the dedicated overflow thread had to be detached
    pub overflow_abandoned: bool,
}

impl ShutdownReport {
    /// Whether every thread the scheduler owned stopped in time.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.abandoned.is_empty() && !self.overflow_abandoned
    }
}

/// Keeps the offload path engaged while a deferred enqueue is outstanding.
///
/// Decrements on drop, so a task the producer discards without running
/// still releases its slot.
struct PendingGuard(Arc<AtomicUsize>);

impl PendingGuard {
    fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(counter))
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A deferred enqueue handed to the overflow producer.
///
/// If the enqueue is refused, or the producer drops the task without running
/// it, the item is cancelled and counted as refused.
struct DeferredEnqueue {
    item: Option<WorkItemRef>,
    queue: BoundedWorkQueue<WorkItemRef>,
    token: CancellationToken,
    refused: Arc<AtomicUsize>,
    _pending: PendingGuard,
}

impl DeferredEnqueue {
    fn run(mut self) {
        if let Some(item) = self.item.take() {
            if let Err(err) = self.queue.enqueue_blocking(item, &self.token) {
                debug!(reason = ?err, "offloaded submission dropped");
                self.item = Some(err.into_inner());
            }
        }
    }
}

impl Drop for DeferredEnqueue {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            item.cancel();
            self.refused.fetch_add(1, Ordering::AcqRel);
        }
    }
}

/// A fixed pool of worker threads fed by one bounded queue.
///
/// # Behavior Guarantees
/// - Never more than `max_concurrency` items run on workers at once
/// - Items submitted from one thread are dequeued in submission order
/// - Once the composed cancellation fires, `submit` drops silently
/// - Dropping the scheduler performs the same teardown as [`shutdown`](Self::shutdown)
pub struct BoundedScheduler {
    config: SchedulerConfig,
    queue: BoundedWorkQueue<WorkItemRef>,
    link: Option<LinkedCancellation>,
    token: CancellationToken,
    pool: Option<WorkerPool>,
    overflow: Option<Arc<dyn OverflowProducer>>,
    dedicated: Option<Arc<DedicatedOverflowThread>>,
    overflow_pending: Arc<AtomicUsize>,
    overflow_refused: Arc<AtomicUsize>,
    state: AtomicU8,
}

impl BoundedScheduler {
    /// Build a scheduler and start all of its workers.
    ///
    /// Under [`WaitPolicy::Parking`] a dedicated overflow thread is spawned
    /// when no producer is supplied. Under [`WaitPolicy::Spinning`] any
    /// supplied producer is ignored.
    ///
    /// # Errors
    /// `InvalidConfiguration` if the configuration fails validation,
    /// `ThreadSpawn` if a thread cannot be created. Threads already started
    /// are stopped before the error is returned.
    pub fn new(
        config: SchedulerConfig,
        overflow_producer: Option<Arc<dyn OverflowProducer>>,
        external: CancellationToken,
    ) -> SchedulerResult<Self> {
        config.validate()?;
        let capacity = config.queue_capacity()?;

        let (overflow, dedicated) = match (config.wait_policy, overflow_producer) {
            (WaitPolicy::Parking, Some(producer)) => (Some(producer), None),
            (WaitPolicy::Parking, None) => {
                let thread = Arc::new(DedicatedOverflowThread::spawn(format!(
                    "{}-overflow",
                    config.thread_name_prefix
                ))?);
                let producer: Arc<dyn OverflowProducer> = thread.clone();
                (Some(producer), Some(thread))
            }
            (WaitPolicy::Spinning, _) => (None, None),
        };

        let link = LinkedCancellation::new([&external]);
        let token = link.token();
        let mut scheduler = Self {
            queue: BoundedWorkQueue::new(capacity),
            link: Some(link),
            token,
            pool: None,
            overflow,
            dedicated,
            overflow_pending: Arc::new(AtomicUsize::new(0)),
            overflow_refused: Arc::new(AtomicUsize::new(0)),
            state: AtomicU8::new(SchedulerState::Constructed as u8),
            config,
        };

        // On failure the partially built scheduler drops and tears itself down.
        if let Some(link) = scheduler.link.as_ref() {
            scheduler.pool = Some(WorkerPool::spawn(&scheduler.config, &scheduler.queue, link)?);
        }
        scheduler.transition(SchedulerState::Constructed, SchedulerState::Running);

        info!(
            max_concurrency = scheduler.config.max_concurrency,
            queue_capacity = capacity,
            policy = %scheduler.config.wait_policy,
            priority = %scheduler.config.priority,
            "bounded scheduler started"
        );
        Ok(scheduler)
    }

    /// Scheduler with `max_concurrency` workers and defaults elsewhere.
    ///
    /// # Errors
    /// See [`new`](Self::new).
    pub fn with_concurrency(max_concurrency: usize) -> SchedulerResult<Self> {
        Self::new(
            SchedulerConfig::with_concurrency(max_concurrency),
            None,
            CancellationToken::none(),
        )
    }

    /// Start configuring a scheduler.
    #[must_use]
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    /// Submit an item for execution on a worker.
    ///
    /// Never fails: once the composed cancellation has fired the item is
    /// dropped and [`SubmitOutcome::Dropped`] is returned. The item is marked
    /// queued before it becomes visible to workers; an item that is marked
    /// but never runs is cancelled.
    pub fn submit(&self, item: WorkItemRef) -> SubmitOutcome {
        if self.token.is_cancelled() {
            return SubmitOutcome::Dropped;
        }
        item.mark_queued();

        match self.config.wait_policy {
            WaitPolicy::Parking => {
                // Earlier offloaded items must land first.
                if self.overflow_pending.load(Ordering::Acquire) > 0 {
                    return self.offload(item);
                }
                match self.queue.try_enqueue(item) {
                    Ok(()) => SubmitOutcome::Enqueued,
                    Err(EnqueueError::Full(item)) => self.offload(item),
                    Err(err) => {
                        err.into_inner().cancel();
                        SubmitOutcome::Dropped
                    }
                }
            }
            WaitPolicy::Spinning => self.spin_enqueue(item),
        }
    }

    fn spin_enqueue(&self, item: WorkItemRef) -> SubmitOutcome {
        match self.queue.enqueue_spinning(item, &self.token) {
            Ok(()) => SubmitOutcome::Enqueued,
            Err(err) => {
                debug!(reason = ?err, "submission dropped while spinning");
                err.into_inner().cancel();
                SubmitOutcome::Dropped
            }
        }
    }

    fn offload(&self, item: WorkItemRef) -> SubmitOutcome {
        let Some(producer) = self.overflow.as_ref() else {
            return self.spin_enqueue(item);
        };

        let deferred = DeferredEnqueue {
            item: Some(item),
            queue: self.queue.clone(),
            token: self.token.clone(),
            refused: Arc::clone(&self.overflow_refused),
            _pending: PendingGuard::acquire(&self.overflow_pending),
        };
        producer.offload(Box::new(move || deferred.run()));

        debug!(pending = self.overflow_pending.load(Ordering::Relaxed), "queue full; submission offloaded");
        SubmitOutcome::Offloaded
    }

    /// Run `item` on the calling thread if that is allowed.
    ///
    /// Returns `false` without running it when the item was queued before or
    /// the caller is not one of this scheduler's workers, and `false` when
    /// the item declined to run because it already ran or was cancelled.
    pub fn try_run_inline(&self, item: &dyn WorkItem, was_previously_queued: bool) -> bool {
        if was_previously_queued || item.was_previously_queued() {
            return false;
        }
        if !self.is_worker_thread() {
            return false;
        }
        item.try_execute()
    }

    /// Enumerating queued items is not supported.
    ///
    /// # Errors
    /// Always returns `Unsupported`.
    pub fn scheduled_items(&self) -> SchedulerResult<Vec<WorkItemRef>> {
        Err(SchedulerError::Unsupported("enumerating scheduled items"))
    }

    /// Configured number of workers.
    #[must_use]
    pub fn maximum_concurrency(&self) -> usize {
        self.config.max_concurrency
    }

    /// Fixed queue capacity.
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Items currently waiting in the queue.
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Workers whose loop has not exited yet.
    #[must_use]
    pub fn live_workers(&self) -> usize {
        self.pool.as_ref().map_or(0, WorkerPool::live_workers)
    }

    /// Per-worker lifecycle, by index.
    #[must_use]
    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.pool.as_ref().map_or_else(Vec::new, WorkerPool::worker_states)
    }

    /// Current lifecycle state.
    ///
    /// Reports `ShuttingDown` as soon as the composed cancellation fires,
    /// including when only the external token fired.
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        match SchedulerState::from_u8(self.state.load(Ordering::Acquire)) {
            SchedulerState::Running if self.token.is_cancelled() => SchedulerState::ShuttingDown,
            state => state,
        }
    }

    /// Whether the composed cancellation has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether the calling thread is one of this scheduler's workers.
    #[must_use]
    pub fn is_worker_thread(&self) -> bool {
        self.pool.as_ref().is_some_and(WorkerPool::is_member)
    }

    /// The configuration the scheduler was built with.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Signal workers to stop without waiting for them.
    ///
    /// Fires the internal cancellation and closes the queue. Later
    /// submissions are dropped. Call [`shutdown`](Self::shutdown) (or drop
    /// the scheduler) to join the workers and release resources.
    pub fn signal_shutdown(&self) {
        if self.transition(SchedulerState::Running, SchedulerState::ShuttingDown)
            || self.transition(SchedulerState::Constructed, SchedulerState::ShuttingDown)
        {
            info!("bounded scheduler shutting down");
        }
        if let Some(link) = self.link.as_ref() {
            link.cancel();
        }
        self.queue.close();
    }

    /// Stop all workers and release every resource.
    ///
    /// Waits up to the configured shutdown timeout per worker. Workers still
    /// running after that are detached and reported, not killed.
    #[must_use = "the report says whether any thread was abandoned"]
    pub fn shutdown(mut self) -> ShutdownReport {
        self.teardown().unwrap_or_default()
    }

    fn teardown(&mut self) -> Option<ShutdownReport> {
        if SchedulerState::from_u8(self.state.load(Ordering::Acquire)) == SchedulerState::Disposed {
            return None;
        }
        self.signal_shutdown();

        let timeout = self.config.shutdown_timeout;
        let mut report = ShutdownReport::default();
        if let Some(pool) = self.pool.take() {
            let joined = pool.join(timeout);
            report.joined = joined.joined;
            report.abandoned = joined.abandoned;
        }

        self.overflow = None;
        if let Some(dedicated) = self.dedicated.take() {
            report.overflow_abandoned = !dedicated.stop(timeout);
            if report.overflow_abandoned {
                warn!(
                    timeout_ms = millis(timeout),
                    "overflow thread did not stop in time; abandoning it"
                );
            }
        }

        let drained = self.queue.drain();
        for item in &drained {
            item.cancel();
        }
        report.discarded = drained.len() + self.overflow_refused.swap(0, Ordering::AcqRel);

        // Released last: abandoned workers may still be waiting on the token.
        if let Some(link) = self.link.take() {
            link.release();
        }
        self.state.store(SchedulerState::Disposed as u8, Ordering::Release);

        info!(
            joined = report.joined,
            abandoned = report.abandoned.len(),
            discarded = report.discarded,
            "bounded scheduler stopped"
        );
        Some(report)
    }

    fn transition(&self, from: SchedulerState, to: SchedulerState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Drop for BoundedScheduler {
    fn drop(&mut self) {
        let _ = self.teardown();
    }
}

impl fmt::Debug for BoundedScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedScheduler")
            .field("state", &self.state())
            .field("max_concurrency", &self.config.max_concurrency)
            .field("queued", &self.queue.len())
            .field("capacity", &self.queue.capacity())
            .field("live_workers", &self.live_workers())
            .finish_non_exhaustive()
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Fluent builder for [`BoundedScheduler`].
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    overflow_producer: Option<Arc<dyn OverflowProducer>>,
    cancellation: CancellationToken,
}

impl SchedulerBuilder {
    /// Builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: SchedulerConfig::default(),
            overflow_producer: None,
            cancellation: CancellationToken::none(),
        }
    }

    /// Set the number of worker threads.
    #[must_use]
    pub fn max_concurrency(mut self, count: usize) -> Self {
        self.config.max_concurrency = count;
        self
    }

    /// Set the OS priority of worker threads.
    #[must_use]
    pub fn priority(mut self, priority: ThreadPriority) -> Self {
        self.config.priority = priority;
        self
    }

    /// Set how full-queue submits and empty-queue workers wait.
    #[must_use]
    pub fn wait_policy(mut self, policy: WaitPolicy) -> Self {
        self.config.wait_policy = policy;
        self
    }

    /// Set the queue slots allotted per worker.
    #[must_use]
    pub fn queue_capacity_factor(mut self, factor: usize) -> Self {
        self.config.queue_capacity_factor = factor;
        self
    }

    /// Set how long shutdown waits for each worker.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    /// Use a caller-supplied overflow producer instead of a dedicated thread.
    #[must_use]
    pub fn overflow_producer(mut self, producer: Arc<dyn OverflowProducer>) -> Self {
        self.overflow_producer = Some(producer);
        self
    }

    /// Stop the scheduler's workers when `token` fires.
    #[must_use]
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// The configuration built so far.
    #[must_use]
    pub fn build_config(&self) -> SchedulerConfig {
        self.config.clone()
    }

    /// Build and start the scheduler.
    ///
    /// # Errors
    /// See [`BoundedScheduler::new`].
    pub fn build(self) -> SchedulerResult<BoundedScheduler> {
        BoundedScheduler::new(self.config, self.overflow_producer, self.cancellation)
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
