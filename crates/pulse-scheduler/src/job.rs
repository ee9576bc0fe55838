//! Job data model for the priority scheduler.
//!
//! A job is an async callable plus a due time, an optional recurrence and a
//! priority. The scheduler keeps at most one live record per job id; heap
//! entries reference records by `(id, generation)` so replaced or cancelled
//! jobs leave stale entries behind that are skipped on pop.

use std::cmp::Ordering;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Serialize, Serializer};
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Dispatch priority. Among jobs due at the same instant, `High` launches
/// first and `Low` last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// JobSpec
// ---------------------------------------------------------------------------

/// When and how often a job runs.
///
/// `delay` is relative to the `schedule` call. Without an `interval` the job
/// runs once; with one it is re-queued at *pop time + interval* after every
/// launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobSpec {
    pub delay: Duration,
    pub interval: Option<Duration>,
    pub priority: Priority,
}

impl JobSpec {
    /// Run once after `delay`.
    pub fn once(delay: Duration) -> Self {
        Self {
            delay,
            interval: None,
            priority: Priority::Normal,
        }
    }

    /// Run first after `delay`, then every `interval`.
    pub fn recurring(delay: Duration, interval: Duration) -> Self {
        Self {
            delay,
            interval: Some(interval),
            priority: Priority::Normal,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

// ---------------------------------------------------------------------------
// Callable
// ---------------------------------------------------------------------------

pub(crate) type JobFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'static>>;
pub(crate) type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync + 'static>;

/// Erase a closure returning a future into the boxed callable the scheduler stores.
pub(crate) fn boxed_job<F, Fut>(job: F) -> JobFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || Box::pin(job()) as JobFuture)
}

// ---------------------------------------------------------------------------
// JobRecord
// ---------------------------------------------------------------------------

/// The single live record for a job id.
pub(crate) struct JobRecord {
    pub func: JobFn,
    pub next_run: Instant,
    pub interval: Option<Duration>,
    pub priority: Priority,
    /// Matches the `generation` of the one heap entry that is still valid.
    pub generation: u64,
    pub runs: u64,
    pub failures: u64,
}

// ---------------------------------------------------------------------------
// HeapEntry
// ---------------------------------------------------------------------------

/// Ordered by `(next_run, priority, generation)`; wrapped in `Reverse` in the
/// heap so the earliest, highest-priority entry is on top.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HeapEntry {
    pub next_run: Instant,
    pub priority: Priority,
    pub generation: u64,
    pub id: String,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.next_run
            .cmp(&other.next_run)
            .then(self.priority.cmp(&other.priority))
            .then(self.generation.cmp(&other.generation))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ---------------------------------------------------------------------------
// JobSnapshot
// ---------------------------------------------------------------------------

/// Point-in-time view of a pending job, for status endpoints and logs.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: String,
    pub priority: Priority,
    /// Time until the job is due; zero when overdue.
    #[serde(serialize_with = "serialize_duration_ms")]
    pub due_in: Duration,
    #[serde(serialize_with = "serialize_duration_opt_ms")]
    pub interval: Option<Duration>,
    pub runs: u64,
    pub failures: u64,
}

// Durations are serialized as whole milliseconds.

fn serialize_duration_ms<S>(d: &Duration, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    s.serialize_u64(d.as_millis() as u64)
}

fn serialize_duration_opt_ms<S>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match d {
        Some(dur) => s.serialize_some(&(dur.as_millis() as u64)),
        None => s.serialize_none(),
    }
}
