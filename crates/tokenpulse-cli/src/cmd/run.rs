use anyhow::Context;
use pulse_scheduler::{JobSpec, Priority, Scheduler};
use std::path::Path;
use std::sync::Arc;
use tokenpulse_core::alert::{BroadcastAlertSink, FanoutSink, LogAlertSink};
use tokenpulse_core::config::MonitorConfig;
use tokenpulse_core::fetch::{BatchFetchClient, SharedCache};
use tokenpulse_core::monitor::MonitorLoop;
use tokenpulse_core::source::DexScreenerSource;
use tokenpulse_core::strategy::MonitorStrategy;

use crate::cmd::open_token_db;

const CACHE_SWEEP_JOB_ID: &str = "cache-sweep";
const ALERT_CHANNEL_CAPACITY: usize = 256;

pub fn run(root: &Path, port: u16, no_server: bool) -> anyhow::Result<()> {
    let config = MonitorConfig::load_or_default(root).context("failed to load config")?;
    config.ensure_valid()?;
    for w in config.validate() {
        tracing::warn!("config: {}", w.message);
    }

    let rt = tokio::runtime::Runtime::new()?;
    let root_buf = root.to_path_buf();

    rt.block_on(async move {
        let store = Arc::new(open_token_db(&root_buf)?);
        let source = Arc::new(DexScreenerSource::new(&config.fetch)?);
        let cache = Arc::new(SharedCache::new(config.cache.ttl()));
        let fetcher = Arc::new(BatchFetchClient::new(
            source,
            cache.clone(),
            &config.cache,
            config.fetch.clone(),
        )?);
        let strategy = Arc::new(MonitorStrategy::new(config.categories.clone()));

        let broadcast = BroadcastAlertSink::new(ALERT_CHANNEL_CAPACITY);
        let sink = FanoutSink::new()
            .with(Arc::new(LogAlertSink))
            .with(Arc::new(broadcast.clone()));

        let monitor = Arc::new(MonitorLoop::new(
            store,
            fetcher,
            strategy,
            Arc::new(sink),
            config.monitor.clone(),
        ));

        let scheduler = Scheduler::new(config.scheduler.to_scheduler_config())?;
        monitor.register(&scheduler)?;
        let ttl = config.cache.ttl();
        scheduler.schedule(
            CACHE_SWEEP_JOB_ID,
            JobSpec::recurring(ttl, ttl).with_priority(Priority::Low),
            move || {
                let cache = cache.clone();
                async move {
                    let purged = cache.purge_expired();
                    if purged > 0 {
                        tracing::debug!(purged, "swept expired cache entries");
                    }
                    anyhow::Ok(())
                }
            },
        )?;
        scheduler.start();
        tracing::info!(
            root = %root_buf.display(),
            interval_secs = config.monitor.interval_secs,
            "tokenpulse engine started"
        );

        let result = if no_server {
            tokio::signal::ctrl_c().await.map_err(anyhow::Error::from)
        } else {
            let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
                .await
                .with_context(|| format!("failed to bind port {port}"))?;
            let app_state =
                tokenpulse_server::AppState::new(scheduler.clone(), monitor, broadcast.sender());
            tokio::select! {
                res = tokenpulse_server::serve_on(app_state, listener) => res,
                _ = tokio::signal::ctrl_c() => Ok(()),
            }
        };

        scheduler.stop();
        tracing::info!("tokenpulse engine stopped");
        result
    })
}
