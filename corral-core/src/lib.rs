//! # Corral Core
//!
//! Core abstractions for the Corral bounded scheduler.
//!
//! Corral replaces ambient, unbounded thread-pool dispatch with a fixed set
//! of workers fed by a bounded queue. This crate holds the pieces the worker
//! pool is built from:
//!
//! - [`WorkItem`]: the capability the scheduler depends on
//! - [`Job`]: a closure-backed work item with an observable lifecycle
//! - [`BoundedWorkQueue`]: the fixed-capacity MPMC queue with cancellable waits
//! - [`CancellationToken`] and [`LinkedCancellation`]: fire-once cooperative
//!   cancellation
//! - [`AdaptiveBackoff`]: bounded CPU burn for spin-poll waits
//! - [`SchedulerConfig`]: validated scheduler configuration

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod backoff;
pub mod cancel;
pub mod config;
pub mod error;
pub mod item;
pub mod job;
pub mod queue;

pub use backoff::AdaptiveBackoff;
pub use cancel::{CancellationRegistration, CancellationSource, CancellationToken, LinkedCancellation};
pub use config::{
    SchedulerConfig, ThreadPriority, WaitPolicy, DEFAULT_QUEUE_CAPACITY_FACTOR,
    DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_THREAD_NAME_PREFIX,
};
pub use error::{DequeueError, EnqueueError, JobError, JobResult, SchedulerError, SchedulerResult};
pub use item::{WorkItem, WorkItemRef, WorkItemState};
pub use job::{Job, JobId};
pub use queue::BoundedWorkQueue;
