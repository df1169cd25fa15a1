//! Worker pool and scheduler facade for Corral.
//!
//! A [`BoundedScheduler`] starts a fixed number of named worker threads at
//! construction and feeds them from one bounded queue. When the queue is
//! full, a submission either goes to an [`OverflowProducer`] (parking
//! policy) or spins on the submitting thread (spinning policy); either way
//! no thread beyond the fixed pool and the optional overflow thread is ever
//! created.
//!
//! ```no_run
//! use corral_core::Job;
//! use corral_executor::BoundedScheduler;
//!
//! let scheduler = BoundedScheduler::builder().max_concurrency(4).build()?;
//! let job = Job::new(|| println!("hello from a worker"));
//! scheduler.submit(job.clone());
//! job.wait()?;
//! let report = scheduler.shutdown();
//! assert!(report.is_clean());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod overflow;
pub mod pool;
mod priority;
pub mod scheduler;
mod thread;

pub use overflow::{DedicatedOverflowThread, OverflowProducer, OverflowTask};
pub use pool::{JoinReport, WorkerPool, WorkerState};
pub use scheduler::{BoundedScheduler, SchedulerBuilder, SchedulerState, ShutdownReport, SubmitOutcome};
