use std::sync::Arc;

use pulse_scheduler::Scheduler;
use tokenpulse_core::alert::GrowthAlert;
use tokenpulse_core::monitor::MonitorLoop;
use tokio::sync::broadcast;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Scheduler,
    pub monitor: Arc<MonitorLoop>,
    /// Growth alerts fanned out to `/api/events` subscribers.
    pub alert_tx: broadcast::Sender<GrowthAlert>,
}

impl AppState {
    pub fn new(
        scheduler: Scheduler,
        monitor: Arc<MonitorLoop>,
        alert_tx: broadcast::Sender<GrowthAlert>,
    ) -> Self {
        Self {
            scheduler,
            monitor,
            alert_tx,
        }
    }
}
