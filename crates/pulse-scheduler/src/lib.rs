//! `pulse-scheduler`: a priority scheduler for one-shot and recurring async jobs.
//!
//! # Architecture
//!
//! ```text
//! schedule(id, JobSpec, fn)
//!     │
//!     ▼
//! min-heap of (next_run, priority)   ← one live record per id; stale
//!     │                                 heap entries skipped on pop
//!     ▼
//! driver task (fixed tick)           ← pops due jobs while in-flight < cap
//!     │
//!     ▼
//! tokio::spawn(job)                  ← errors and panics logged per job
//! ```
//!
//! # Quick start
//!
//! ```rust,ignore
//! use pulse_scheduler::{JobSpec, Priority, Scheduler, SchedulerConfig};
//! use std::time::Duration;
//!
//! let scheduler = Scheduler::new(SchedulerConfig::default())?;
//! scheduler.schedule(
//!     "heartbeat",
//!     JobSpec::recurring(Duration::from_secs(1), Duration::from_secs(30))
//!         .with_priority(Priority::High),
//!     || async {
//!         tracing::info!("still alive");
//!         Ok(())
//!     },
//! )?;
//! scheduler.start();
//! ```

pub mod error;
pub mod job;
pub mod scheduler;

pub use error::SchedulerError;
pub use job::{JobSnapshot, JobSpec, Priority};
pub use scheduler::{Scheduler, SchedulerConfig};

/// Re-exported so callers can build absolute due times for
/// [`Scheduler::reschedule`] on the same clock the scheduler uses.
pub use tokio::time::Instant;
