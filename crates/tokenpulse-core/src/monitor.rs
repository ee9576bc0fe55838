//! Monitoring loop: the recurring job that ties the engine together.
//!
//! One cycle:
//!
//! ```text
//! store.list_active ─► strategy.select_due ─► fetcher.fetch_batch
//!        ─► store.get + observe + watermark check per token ─► store.set
//!        ─► strategy.record_check ─► alert sink (jittered)
//! ```
//!
//! State is persisted before any notification goes out, and an alert whose
//! watermark could not be persisted is not sent. A crash between the two can
//! lose an alert but never repeat one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pulse_scheduler::{JobSpec, Priority, Scheduler};
use rand::Rng;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::alert::{AlertSink, GrowthAlert};
use crate::config::LoopConfig;
use crate::error::Result;
use crate::fetch::BatchFetchClient;
use crate::store::TokenStore;
use crate::strategy::MonitorStrategy;
use crate::types::{Category, TokenState};

pub const MONITOR_JOB_ID: &str = "monitor-cycle";

/// What one cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub tracked: usize,
    pub due: usize,
    pub with_data: usize,
    pub no_data: usize,
    pub alerts: usize,
    pub persisted: usize,
    /// The previous cycle was still running, so this one did nothing.
    pub skipped: bool,
}

pub struct MonitorLoop {
    store: Arc<dyn TokenStore>,
    fetcher: Arc<BatchFetchClient>,
    strategy: Arc<MonitorStrategy>,
    sink: Arc<dyn AlertSink>,
    config: LoopConfig,
    busy: AtomicBool,
}

impl MonitorLoop {
    pub fn new(
        store: Arc<dyn TokenStore>,
        fetcher: Arc<BatchFetchClient>,
        strategy: Arc<MonitorStrategy>,
        sink: Arc<dyn AlertSink>,
        config: LoopConfig,
    ) -> Self {
        Self {
            store,
            fetcher,
            strategy,
            sink,
            config,
            busy: AtomicBool::new(false),
        }
    }

    pub fn strategy(&self) -> &Arc<MonitorStrategy> {
        &self.strategy
    }

    pub fn fetcher(&self) -> &Arc<BatchFetchClient> {
        &self.fetcher
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// Register the cycle on `scheduler` as a high-priority recurring job.
    pub fn register(self: &Arc<Self>, scheduler: &Scheduler) -> Result<String> {
        let this = Arc::clone(self);
        let spec = JobSpec::recurring(self.config.initial_delay(), self.config.interval())
            .with_priority(Priority::High);
        let id = scheduler.schedule(MONITOR_JOB_ID, spec, move || {
            let this = Arc::clone(&this);
            async move {
                this.run_cycle().await?;
                anyhow::Ok(())
            }
        })?;
        info!(
            job = %id,
            interval_secs = self.config.interval_secs,
            "monitor loop registered"
        );
        Ok(id)
    }

    pub async fn run_cycle(&self) -> Result<CycleReport> {
        self.run_cycle_at(Utc::now()).await
    }

    /// Run one cycle as of `now`.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let Some(_busy) = BusyGuard::acquire(&self.busy) else {
            warn!("previous monitor cycle still running, skipping");
            return Ok(CycleReport {
                skipped: true,
                ..Default::default()
            });
        };

        let tracked = self.store.list_active().await?;
        let due = self.strategy.select_due(&tracked, now);
        let mut report = CycleReport {
            tracked: tracked.len(),
            due: due.len(),
            ..Default::default()
        };
        if due.is_empty() {
            debug!(tracked = report.tracked, "no tokens due");
            return Ok(report);
        }

        let data = self.fetcher.fetch_batch(&due).await;
        let mut by_id: HashMap<String, TokenState> =
            tracked.into_iter().map(|t| (t.id.clone(), t)).collect();

        let mut alerts = Vec::new();
        for id in &due {
            let Some(snapshot) = by_id.remove(id) else {
                continue;
            };
            let Some(record) = data.get(id).cloned().flatten() else {
                report.no_data += 1;
                self.strategy.record_check(&snapshot, now);
                debug!(token = %id, "no market data");
                continue;
            };
            report.with_data += 1;

            // The record may have been untracked or edited while the fetch
            // was in flight; fold the sample into what is stored now.
            let mut state = match self.store.get(id).await {
                Ok(Some(state)) if state.active => state,
                Ok(_) => {
                    debug!(token = %id, "token untracked during cycle, dropping sample");
                    continue;
                }
                Err(e) => {
                    error!(token = %id, error = %e, "failed to reload token state");
                    continue;
                }
            };
            state.observe(&record, now);
            let category = self.strategy.record_check(&state, now);
            let alert = self.evaluate(&mut state, now);
            debug!(
                token = %id,
                category = %category,
                multiplier = state.multiplier().unwrap_or(1.0),
                watermark = state.alert_watermark,
                "token checked"
            );

            match self.store.set(&state).await {
                Ok(()) => {
                    report.persisted += 1;
                    alerts.extend(alert);
                }
                Err(e) => error!(
                    token = %id,
                    error = %e,
                    held_back = alert.is_some(),
                    "failed to persist token state"
                ),
            }
        }

        report.alerts = alerts.len();
        self.dispatch(&alerts).await;

        info!(
            tracked = report.tracked,
            due = report.due,
            with_data = report.with_data,
            no_data = report.no_data,
            alerts = report.alerts,
            "monitor cycle complete"
        );
        Ok(report)
    }

    /// Advance the watermark and build an alert when the truncated multiplier
    /// passes it and the growth meets the category threshold.
    fn evaluate(&self, state: &mut TokenState, now: DateTime<Utc>) -> Option<GrowthAlert> {
        let multiplier = state.multiplier()?;
        let level = whole_multiple(multiplier);
        if level <= state.alert_watermark {
            return None;
        }
        if !self.strategy.should_alert(&state.id, state.growth_percent()) {
            return None;
        }
        state.alert_watermark = level;
        let category = self
            .strategy
            .category_of(&state.id)
            .unwrap_or(Category::Inactive);
        Some(GrowthAlert::new(state, multiplier, level, category, now))
    }

    async fn dispatch(&self, alerts: &[GrowthAlert]) {
        for (i, alert) in alerts.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.notify_delay()).await;
            }
            if let Err(e) = self.sink.notify_growth(alert).await {
                warn!(token = %alert.token, error = %e, "alert delivery failed");
            }
        }
    }

    fn notify_delay(&self) -> Duration {
        let (min, max) = (self.config.notify_delay_min_ms, self.config.notify_delay_max_ms);
        if min >= max {
            Duration::from_millis(min)
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(min..=max))
        }
    }
}

fn whole_multiple(multiplier: f64) -> u32 {
    if multiplier.is_finite() && multiplier > 0.0 {
        multiplier.trunc().min(u32::MAX as f64) as u32
    } else {
        0
    }
}

struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TtlCache;
    use crate::config::{CacheConfig, CategoryTable, FetchConfig};
    use crate::error::{FetchError, PulseError};
    use crate::source::{DataSource, PairData, TokenRef};
    use crate::store::MemoryTokenStore;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use pulse_scheduler::SchedulerConfig;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapSource {
        caps: Mutex<HashMap<String, f64>>,
        calls: AtomicUsize,
        latency: Duration,
    }

    impl CapSource {
        fn set(&self, id: &str, cap: f64) {
            self.caps.lock().unwrap().insert(id.to_string(), cap);
        }
    }

    #[async_trait]
    impl DataSource for CapSource {
        async fn fetch(&self, ids: &[String]) -> std::result::Result<Vec<PairData>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            let caps = self.caps.lock().unwrap().clone();
            Ok(ids
                .iter()
                .filter_map(|id| {
                    caps.get(id).map(|cap| PairData {
                        base_token: TokenRef {
                            address: id.clone(),
                            name: None,
                            symbol: Some("TKN".into()),
                        },
                        fdv: Some(*cap),
                        ..Default::default()
                    })
                })
                .collect())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        alerts: Mutex<Vec<GrowthAlert>>,
        fail: bool,
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        async fn notify_growth(&self, alert: &GrowthAlert) -> Result<()> {
            self.alerts.lock().unwrap().push(alert.clone());
            if self.fail {
                return Err(PulseError::Alert("chat down".into()));
            }
            Ok(())
        }
    }

    /// Memory store whose next `failing_sets` writes fail.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryTokenStore,
        failing_sets: AtomicUsize,
    }

    #[async_trait]
    impl TokenStore for FlakyStore {
        async fn get(&self, id: &str) -> Result<Option<TokenState>> {
            self.inner.get(id).await
        }

        async fn set(&self, state: &TokenState) -> Result<()> {
            let fail = self
                .failing_sets
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if fail {
                return Err(PulseError::Store("disk full".into()));
            }
            self.inner.set(state).await
        }

        async fn list_active(&self) -> Result<Vec<TokenState>> {
            self.inner.list_active().await
        }

        async fn list_all(&self) -> Result<Vec<TokenState>> {
            self.inner.list_all().await
        }
    }

    struct Harness {
        source: Arc<CapSource>,
        store: Arc<dyn TokenStore>,
        sink: Arc<RecordingSink>,
        monitor: Arc<MonitorLoop>,
    }

    fn harness_with(source: CapSource, sink: RecordingSink) -> Harness {
        harness_on(Arc::new(MemoryTokenStore::new()), source, sink)
    }

    fn harness_on(store: Arc<dyn TokenStore>, source: CapSource, sink: RecordingSink) -> Harness {
        let source = Arc::new(source);
        let sink = Arc::new(sink);
        let cache = Arc::new(TtlCache::new(Duration::from_secs(120)));
        let fetch = FetchConfig {
            inter_chunk_delay_ms: 0,
            ..Default::default()
        };
        let fetcher = Arc::new(
            BatchFetchClient::new(source.clone(), cache, &CacheConfig::default(), fetch).unwrap(),
        );
        let strategy = Arc::new(MonitorStrategy::new(CategoryTable::default()));
        let monitor = Arc::new(MonitorLoop::new(
            store.clone(),
            fetcher,
            strategy,
            sink.clone(),
            LoopConfig::default(),
        ));
        Harness {
            source,
            store,
            sink,
            monitor,
        }
    }

    fn harness() -> Harness {
        harness_with(CapSource::default(), RecordingSink::default())
    }

    /// A token first seen `age_hours` ago with a baseline cap of 100.
    async fn seed(h: &Harness, id: &str, age_hours: i64, now: DateTime<Utc>) {
        let mut t = TokenState::new(id, now - ChronoDuration::hours(age_hours));
        t.initial_market_cap = Some(100.0);
        t.peak_market_cap = Some(100.0);
        t.current_market_cap = Some(100.0);
        h.store.set(&t).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn two_and_a_half_x_alerts_once_and_moves_watermark() {
        let h = harness();
        let now = Utc::now();
        seed(&h, "tokA", 5, now).await;
        h.source.set("tokA", 250.0);

        let report = h.monitor.run_cycle_at(now).await.unwrap();
        assert_eq!(report.due, 1);
        assert_eq!(report.with_data, 1);
        assert_eq!(report.alerts, 1);
        assert_eq!(report.persisted, 1);

        let stored = h.store.get("tokA").await.unwrap().unwrap();
        assert_eq!(stored.alert_watermark, 2);
        assert_eq!(stored.peak_market_cap, Some(250.0));
        let alerts = h.sink.alerts.lock().unwrap().clone();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].watermark, 2);
        assert!((alerts[0].multiplier - 2.5).abs() < 1e-9);
        assert_eq!(alerts[0].market_cap_label, "$250.00");

        // Same multiplier next check: no repeat.
        let report = h.monitor.run_cycle_at(now + ChronoDuration::seconds(31)).await.unwrap();
        assert_eq!(report.due, 1);
        assert_eq!(report.alerts, 0);

        // Fresh data at 4.2x moves the watermark to 4.
        tokio::time::advance(Duration::from_secs(121)).await;
        h.source.set("tokA", 420.0);
        let report = h.monitor.run_cycle_at(now + ChronoDuration::seconds(200)).await.unwrap();
        assert_eq!(report.alerts, 1);
        let marks: Vec<u32> = h.sink.alerts.lock().unwrap().iter().map(|a| a.watermark).collect();
        assert_eq!(marks, vec![2, 4]);
        assert_eq!(h.store.get("tokA").await.unwrap().unwrap().alert_watermark, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn alert_waits_until_watermark_is_persisted() {
        let store = Arc::new(FlakyStore::default());
        let h = harness_on(store.clone(), CapSource::default(), RecordingSink::default());
        let now = Utc::now();
        seed(&h, "tokP", 5, now).await;
        h.source.set("tokP", 250.0);
        store.failing_sets.store(1, Ordering::SeqCst);

        let report = h.monitor.run_cycle_at(now).await.unwrap();
        assert_eq!(report.with_data, 1);
        assert_eq!(report.persisted, 0);
        assert_eq!(report.alerts, 0);
        assert!(h.sink.alerts.lock().unwrap().is_empty());
        assert_eq!(h.store.get("tokP").await.unwrap().unwrap().alert_watermark, 1);

        // Store is back: the crossing is alerted exactly once.
        let report = h.monitor.run_cycle_at(now + ChronoDuration::seconds(31)).await.unwrap();
        assert_eq!(report.persisted, 1);
        assert_eq!(report.alerts, 1);
        h.monitor.run_cycle_at(now + ChronoDuration::seconds(62)).await.unwrap();

        let marks: Vec<u32> = h.sink.alerts.lock().unwrap().iter().map(|a| a.watermark).collect();
        assert_eq!(marks, vec![2]);
        assert_eq!(h.store.get("tokP").await.unwrap().unwrap().alert_watermark, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn edits_made_during_the_fetch_survive_the_cycle() {
        let h = harness_with(
            CapSource {
                latency: Duration::from_secs(2),
                ..Default::default()
            },
            RecordingSink::default(),
        );
        let now = Utc::now();
        seed(&h, "tokQ", 5, now).await;
        seed(&h, "tokR", 5, now).await;
        h.source.set("tokQ", 250.0);
        h.source.set("tokR", 120.0);

        let edit = async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            h.store.deactivate("tokQ").await.unwrap();
            let mut r = h.store.get("tokR").await.unwrap().unwrap();
            r.symbol = Some("RENAMED".into());
            h.store.set(&r).await.unwrap();
        };
        let (report, ()) = tokio::join!(h.monitor.run_cycle_at(now), edit);
        let report = report.unwrap();
        assert_eq!(report.due, 2);
        assert_eq!(report.persisted, 1);
        assert_eq!(report.alerts, 0);
        assert!(h.sink.alerts.lock().unwrap().is_empty());

        let q = h.store.get("tokQ").await.unwrap().unwrap();
        assert!(!q.active);
        assert_eq!(q.current_market_cap, Some(100.0));
        let r = h.store.get("tokR").await.unwrap().unwrap();
        assert_eq!(r.symbol.as_deref(), Some("RENAMED"));
        assert_eq!(r.current_market_cap, Some(120.0));
    }

    #[tokio::test(start_paused = true)]
    async fn cached_sample_does_not_erase_recent_growth() {
        let h = harness();
        let now = Utc::now();
        seed(&h, "tokS", 5, now).await;
        h.source.set("tokS", 112.0);

        h.monitor.run_cycle_at(now).await.unwrap();
        assert_eq!(h.monitor.strategy().category_of("tokS"), Some(Category::Hot));

        // Hot tokens are due again after 30s; the 120s cache still answers.
        let report = h.monitor.run_cycle_at(now + ChronoDuration::seconds(31)).await.unwrap();
        assert_eq!(report.due, 1);
        assert_eq!(h.source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.monitor.strategy().category_of("tokS"), Some(Category::Hot));

        let stored = h.store.get("tokS").await.unwrap().unwrap();
        assert_eq!(stored.previous_market_cap, Some(100.0));
        assert_eq!(stored.current_market_cap, Some(112.0));
    }

    #[tokio::test(start_paused = true)]
    async fn growth_below_two_x_never_alerts() {
        let h = harness();
        let now = Utc::now();
        seed(&h, "tokB", 48, now).await;
        h.source.set("tokB", 190.0);

        let report = h.monitor.run_cycle_at(now).await.unwrap();
        assert_eq!(report.alerts, 0);
        assert_eq!(report.persisted, 1);
        let stored = h.store.get("tokB").await.unwrap().unwrap();
        assert_eq!(stored.alert_watermark, 1);
        assert_eq!(stored.current_market_cap, Some(190.0));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_data_is_counted_not_persisted() {
        let h = harness();
        let now = Utc::now();
        seed(&h, "tokC", 2, now).await;

        let report = h.monitor.run_cycle_at(now).await.unwrap();
        assert_eq!(report.no_data, 1);
        assert_eq!(report.persisted, 0);
        assert!(h.monitor.strategy().category_of("tokC").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_not_due_are_skipped() {
        let h = harness();
        let now = Utc::now();
        seed(&h, "tokD", 72, now).await; // inactive: every 30 minutes
        h.source.set("tokD", 100.0);

        assert_eq!(h.monitor.run_cycle_at(now).await.unwrap().due, 1);
        let report = h.monitor.run_cycle_at(now + ChronoDuration::minutes(5)).await.unwrap();
        assert_eq!(report.tracked, 1);
        assert_eq!(report.due, 0);
        assert_eq!(h.source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_sink_does_not_fail_the_cycle() {
        let h = harness_with(
            CapSource::default(),
            RecordingSink {
                fail: true,
                ..Default::default()
            },
        );
        let now = Utc::now();
        seed(&h, "tokE", 3, now).await;
        seed(&h, "tokF", 3, now).await;
        h.source.set("tokE", 300.0);
        h.source.set("tokF", 500.0);

        let report = h.monitor.run_cycle_at(now).await.unwrap();
        assert_eq!(report.alerts, 2);
        assert_eq!(h.sink.alerts.lock().unwrap().len(), 2);
        // Watermarks were persisted before delivery was attempted.
        assert_eq!(h.store.get("tokF").await.unwrap().unwrap().alert_watermark, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_cycle_is_skipped() {
        let h = harness_with(
            CapSource {
                latency: Duration::from_secs(2),
                ..Default::default()
            },
            RecordingSink::default(),
        );
        let now = Utc::now();
        seed(&h, "tokG", 1, now).await;

        let (first, second) = tokio::join!(h.monitor.run_cycle_at(now), h.monitor.run_cycle_at(now));
        assert!(!first.unwrap().skipped);
        assert!(second.unwrap().skipped);
        assert!(!h.monitor.run_cycle_at(now).await.unwrap().skipped);
    }

    #[tokio::test(start_paused = true)]
    async fn register_adds_high_priority_recurring_job() {
        let h = harness();
        let scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
        let id = h.monitor.register(&scheduler).unwrap();
        assert_eq!(id, MONITOR_JOB_ID);

        let snap = scheduler.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].priority, Priority::High);
        assert_eq!(snap[0].interval, Some(Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_drives_the_cycle() {
        let h = harness();
        let now = Utc::now();
        seed(&h, "tokH", 0, now).await;
        h.source.set("tokH", 100.0);

        let scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
        h.monitor.register(&scheduler).unwrap();
        scheduler.start();
        tokio::time::sleep(Duration::from_secs(4)).await;
        scheduler.stop();

        assert_eq!(h.source.calls.load(Ordering::SeqCst), 1);
        let state = h.store.get("tokH").await.unwrap().unwrap();
        assert_eq!(h.monitor.strategy().category_of(&state.id), Some(Category::Hot));
    }

    #[test]
    fn whole_multiple_truncates() {
        assert_eq!(whole_multiple(2.5), 2);
        assert_eq!(whole_multiple(0.4), 0);
        assert_eq!(whole_multiple(f64::INFINITY), 0);
    }
}
