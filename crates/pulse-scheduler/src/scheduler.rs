use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::SchedulerError;
use crate::job::{boxed_job, HeapEntry, JobFn, JobRecord, JobSnapshot, JobSpec, Priority};

// ─── SchedulerConfig ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// How often the driver wakes to launch due jobs.
    pub tick: Duration,
    /// Upper bound on jobs executing at the same time.
    pub max_concurrent: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(100),
            max_concurrent: 8,
        }
    }
}

// ─── Scheduler ────────────────────────────────────────────────────────────

/// Runs one-shot and recurring async jobs ordered by due time, then priority.
///
/// A driver task wakes every `tick`, pops due jobs while fewer than
/// `max_concurrent` are in flight, and spawns each one as its own Tokio task.
/// A recurring job is re-queued at the moment it is popped, for
/// `pop time + interval`, so a late launch shifts every later occurrence by
/// the same lag instead of bursting to catch up.
///
/// Job errors and panics are logged and counted; they never reach the driver.
/// Cancelling a job that is already executing only drops its future
/// occurrences.
///
/// `Scheduler` is cheap to clone; clones share the same queue and driver.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    config: SchedulerConfig,
    state: Mutex<QueueState>,
    running: AtomicUsize,
    driver: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<Reverse<HeapEntry>>,
    jobs: HashMap<String, JobRecord>,
    next_generation: u64,
}

impl QueueState {
    fn push(&mut self, id: &str, next_run: Instant, priority: Priority) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;
        self.heap.push(Reverse(HeapEntry {
            next_run,
            priority,
            generation,
            id: id.to_string(),
        }));
        generation
    }

    fn is_live(&self, entry: &HeapEntry) -> bool {
        self.jobs
            .get(&entry.id)
            .is_some_and(|r| r.generation == entry.generation)
    }

    /// Drop stale entries once they outnumber live ones by a wide margin.
    /// Call only after every pushed generation has been recorded.
    fn compact(&mut self) {
        if self.heap.len() <= 2 * self.jobs.len() + 64 {
            return;
        }
        let entries = std::mem::take(&mut self.heap).into_vec();
        self.heap = entries
            .into_iter()
            .filter(|Reverse(e)| self.is_live(e))
            .collect();
    }
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        if config.max_concurrent == 0 {
            return Err(SchedulerError::ZeroConcurrency);
        }
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(QueueState::default()),
                running: AtomicUsize::new(0),
                driver: Mutex::new(None),
            }),
        })
    }

    /// Insert a job, replacing any pending job with the same id.
    ///
    /// Returns the id. Fails only for an empty id or a recurring spec with a
    /// zero interval.
    pub fn schedule<F, Fut>(
        &self,
        id: impl Into<String>,
        spec: JobSpec,
        job: F,
    ) -> Result<String, SchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let id = id.into();
        if id.is_empty() {
            return Err(SchedulerError::EmptyId);
        }
        if spec.interval.is_some_and(|i| i.is_zero()) {
            return Err(SchedulerError::ZeroInterval(id));
        }

        let next_run = Instant::now() + spec.delay;
        let mut state = self.inner.lock_state();
        let generation = state.push(&id, next_run, spec.priority);
        let previous = state.jobs.insert(
            id.clone(),
            JobRecord {
                func: boxed_job(job),
                next_run,
                interval: spec.interval,
                priority: spec.priority,
                generation,
                runs: 0,
                failures: 0,
            },
        );
        state.compact();
        drop(state);

        if previous.is_some() {
            tracing::debug!(job = %id, "replaced pending job");
        } else {
            tracing::debug!(job = %id, delay_ms = spec.delay.as_millis() as u64, priority = %spec.priority, "scheduled job");
        }
        Ok(id)
    }

    /// Remove a pending job. Returns `false` if the id is unknown.
    pub fn cancel(&self, id: &str) -> bool {
        let removed = self.inner.lock_state().jobs.remove(id).is_some();
        if removed {
            tracing::debug!(job = %id, "cancelled job");
        }
        removed
    }

    /// Move a pending job's due time to `at`, keeping its callable, interval
    /// and priority. Returns `false` if the id is unknown.
    pub fn reschedule(&self, id: &str, at: Instant) -> bool {
        let mut state = self.inner.lock_state();
        let Some(priority) = state.jobs.get(id).map(|r| r.priority) else {
            return false;
        };
        let generation = state.push(id, at, priority);
        if let Some(record) = state.jobs.get_mut(id) {
            record.generation = generation;
            record.next_run = at;
        }
        state.compact();
        true
    }

    /// Spawn the driver loop. No-op if it is already running or if called
    /// outside a Tokio runtime.
    pub fn start(&self) {
        let mut driver = self.inner.lock_driver();
        if driver.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("scheduler start requested outside a Tokio runtime; ignoring");
            return;
        };
        let inner = Arc::clone(&self.inner);
        *driver = Some(handle.spawn(inner.drive()));
        tracing::info!(
            tick_ms = self.inner.config.tick.as_millis() as u64,
            max_concurrent = self.inner.config.max_concurrent,
            "scheduler started"
        );
    }

    /// Stop the driver loop. Jobs already in flight run to completion.
    pub fn stop(&self) {
        if let Some(handle) = self.inner.lock_driver().take() {
            handle.abort();
            tracing::info!("scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .lock_driver()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock_state().jobs.contains_key(id)
    }

    /// Jobs waiting in the queue (one-shot jobs leave it when launched).
    pub fn pending_count(&self) -> usize {
        self.inner.lock_state().jobs.len()
    }

    /// Jobs currently executing.
    pub fn running_count(&self) -> usize {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Pending jobs in launch order.
    pub fn snapshot(&self) -> Vec<JobSnapshot> {
        let now = Instant::now();
        let state = self.inner.lock_state();
        let mut jobs: Vec<(&String, &JobRecord)> = state.jobs.iter().collect();
        jobs.sort_by(|(_, a), (_, b)| {
            a.next_run
                .cmp(&b.next_run)
                .then(a.priority.cmp(&b.priority))
        });
        jobs.into_iter()
            .map(|(id, r)| JobSnapshot {
                id: id.clone(),
                priority: r.priority,
                due_in: r.next_run.saturating_duration_since(now),
                interval: r.interval,
                runs: r.runs,
                failures: r.failures,
            })
            .collect()
    }
}

// ─── Driver ───────────────────────────────────────────────────────────────

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        // A panic while holding the lock cannot leave the heap half-built:
        // every mutation is a single push/pop/insert. Keep going.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_driver(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.driver.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn drive(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            for (id, func) in self.pop_due(Instant::now()) {
                self.launch(id, func);
            }
        }
    }

    /// Pop every due job that fits under the concurrency cap, re-queueing
    /// recurring ones.
    fn pop_due(&self, now: Instant) -> Vec<(String, JobFn)> {
        let mut state = self.lock_state();
        let mut due = Vec::new();

        loop {
            if self.running.load(Ordering::SeqCst) + due.len() >= self.config.max_concurrent {
                break;
            }
            let Some(Reverse(top)) = state.heap.peek() else {
                break;
            };
            if !state.is_live(top) {
                state.heap.pop();
                continue;
            }
            if top.next_run > now {
                break;
            }
            let Some(Reverse(entry)) = state.heap.pop() else {
                break;
            };
            let popped_at = Instant::now();

            let (func, interval, priority) = match state.jobs.get_mut(&entry.id) {
                Some(record) => {
                    record.runs += 1;
                    (Arc::clone(&record.func), record.interval, record.priority)
                }
                None => continue,
            };

            match interval {
                Some(interval) => {
                    let next_run = popped_at + interval;
                    let generation = state.push(&entry.id, next_run, priority);
                    if let Some(record) = state.jobs.get_mut(&entry.id) {
                        record.generation = generation;
                        record.next_run = next_run;
                    }
                }
                None => {
                    state.jobs.remove(&entry.id);
                }
            }
            due.push((entry.id, func));
        }
        state.compact();
        due
    }

    fn launch(self: &Arc<Self>, id: String, func: JobFn) {
        self.running.fetch_add(1, Ordering::SeqCst);
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let started = Instant::now();
            let outcome = AssertUnwindSafe(async { func().await }).catch_unwind().await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            let failed = match outcome {
                Ok(Ok(())) => {
                    tracing::debug!(job = %id, elapsed_ms, "job finished");
                    false
                }
                Ok(Err(e)) => {
                    tracing::error!(job = %id, elapsed_ms, error = %format!("{e:#}"), "job failed");
                    true
                }
                Err(panic) => {
                    tracing::error!(job = %id, elapsed_ms, panic = %panic_message(panic.as_ref()), "job panicked");
                    true
                }
            };
            if failed {
                if let Some(record) = inner.lock_state().jobs.get_mut(&id) {
                    record.failures += 1;
                }
            }
            inner.running.fetch_sub(1, Ordering::SeqCst);
        });
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────
